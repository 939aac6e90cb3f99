//! Run-scoped controls: cancellation and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use concord_core::Phase;

/// Create a linked cancellation handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Requests cancellation of every run holding the paired signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// Never resolves if the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Optional per-run controls.
#[derive(Debug, Clone, Default)]
pub struct RunControls {
    pub cancel: Option<CancelSignal>,
    pub events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl RunControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }
}
