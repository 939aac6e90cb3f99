//! Evaluator envelope: timeout, rate-limit backoff and circuit breaking
//! around any [`Evaluator`].

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use concord_core::{Context, Fault, FaultKind, Role};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::collaborators::Evaluator;

/// Envelope configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Budget for a single attempt
    #[serde(with = "concord_core::duration")]
    pub timeout: Duration,

    /// Retries after a RATE_LIMIT fault
    pub max_retries: usize,

    /// First backoff delay; doubles on every retry
    #[serde(with = "concord_core::duration")]
    pub min_backoff: Duration,

    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            min_backoff: Duration::from_millis(200),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Wraps an evaluator so every call is bounded and retried on rate limits.
///
/// Only `RATE_LIMIT` faults are retried. Every failed call, after retries,
/// counts against the role's circuit.
pub struct EvaluatorEnvelope {
    inner: Arc<dyn Evaluator>,
    config: EnvelopeConfig,
    breaker: CircuitBreaker,
}

impl EvaluatorEnvelope {
    pub fn new(inner: Arc<dyn Evaluator>, config: EnvelopeConfig) -> Self {
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        Self {
            inner,
            config,
            breaker,
        }
    }

    async fn attempt(&self, role: Role, instruction: &str, context: &Context) -> Result<Value, Fault> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.inner.evaluate(role, instruction, context)).await {
            Ok(reply) => reply,
            Err(_) => Err(Fault::timeout(format!(
                "no reply within {}",
                humantime::format_duration(timeout)
            ))),
        }
    }
}

#[async_trait]
impl Evaluator for EvaluatorEnvelope {
    async fn evaluate(&self, role: Role, instruction: &str, context: &Context) -> Result<Value, Fault> {
        if self.breaker.is_open(role) {
            return Err(Fault::system(format!("circuit open for {}", role)));
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.min_backoff)
            .with_max_times(self.config.max_retries);

        let reply = (|| self.attempt(role, instruction, context))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|fault: &Fault| fault.kind == FaultKind::RateLimit)
            .notify(|fault: &Fault, after: Duration| {
                tracing::warn!(role = %role, error = %fault, retry_in = ?after, "Rate limited, backing off");
            })
            .await;

        match &reply {
            Ok(_) => self.breaker.record_success(role),
            Err(fault) => {
                tracing::warn!(role = %role, error = %fault, "Evaluator call failed");
                self.breaker.record_failure(role);
            }
        }
        reply
    }
}
