//! Resolution phase: applies an approved decision over a bounded number of
//! discrete steps.
//!
//! Each step asks the [`StepProposer`] for one actor move given the trace so
//! far. The first reply that cannot be parsed, or the first proposer error,
//! ends the phase with a crash marker; nothing is retried.

use concord_core::{
    interpret_step, Context, Decision, ResolutionOutcome, ResolutionReport, ResolutionStep,
};

use crate::collaborators::{StabilityPolicy, StepProposer};

/// An in-progress resolution trace.
///
/// Steps are driven one at a time so the caller can check cancellation and
/// deadlines between them. The trace is append-only.
#[derive(Debug, Clone)]
pub struct Resolution {
    max_steps: u32,
    trace: Vec<ResolutionStep>,
    halted: Option<String>,
}

impl Resolution {
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps,
            trace: Vec::new(),
            halted: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.halted.is_some() || self.trace.len() as u32 >= self.max_steps
    }

    /// Run one step. Returns the appended step, or `None` if the phase is
    /// finished or this step crashed it.
    pub async fn advance(
        &mut self,
        proposer: &dyn StepProposer,
        decision: &Decision,
        context: &Context,
    ) -> Option<ResolutionStep> {
        if self.is_finished() {
            return None;
        }
        let index = self.trace.len() as u32 + 1;

        let raw = match proposer.propose_step(decision, &self.trace, context).await {
            Ok(raw) => raw,
            Err(e) => {
                self.halt(format!("step {}: {}", index, e));
                return None;
            }
        };

        match interpret_step(raw) {
            Ok(proposal) => {
                let step = ResolutionStep {
                    index,
                    actor: proposal.actor,
                    action: proposal.action,
                    outcome: proposal.outcome,
                };
                self.trace.push(step.clone());
                Some(step)
            }
            Err(reason) => {
                self.halt(format!("step {}: {}", index, reason));
                None
            }
        }
    }

    /// Stop the phase early. The first reason is kept.
    pub fn halt(&mut self, reason: impl Into<String>) {
        if self.halted.is_none() {
            let reason = reason.into();
            tracing::warn!(steps = self.trace.len(), reason = %reason, "Resolution halted");
            self.halted = Some(reason);
        }
    }

    pub fn finish(self, stability: &dyn StabilityPolicy, decision: &Decision) -> ResolutionReport {
        let outcome = match self.halted {
            Some(reason) => ResolutionOutcome::Crash { reason },
            None => ResolutionOutcome::Completed,
        };
        let summary = self
            .trace
            .iter()
            .map(ResolutionStep::summary_line)
            .collect::<Vec<_>>()
            .join("\n");
        let stability_score = stability.score(decision, &self.trace, &outcome);

        ResolutionReport {
            step_count: self.trace.len() as u32,
            trace: self.trace,
            outcome,
            stability_score,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorError, FixedStability};
    use async_trait::async_trait;
    use concord_core::DecisionType;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    struct Replies {
        replies: Mutex<Vec<Result<Value, CollaboratorError>>>,
        seen_trace_lens: Mutex<Vec<usize>>,
    }

    impl Replies {
        fn new(replies: Vec<Result<Value, CollaboratorError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen_trace_lens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StepProposer for Replies {
        async fn propose_step(
            &self,
            _: &Decision,
            trace: &[ResolutionStep],
            _: &Context,
        ) -> Result<Value, CollaboratorError> {
            self.seen_trace_lens.lock().push(trace.len());
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Ok(json!({"actor": "Council", "action": "Hold"}))
            } else {
                replies.remove(0)
            }
        }
    }

    /// Drive every step with nothing to interrupt it.
    async fn drive(
        mut resolution: Resolution,
        proposer: &dyn StepProposer,
        stability: &dyn StabilityPolicy,
    ) -> ResolutionReport {
        while !resolution.is_finished() {
            resolution.advance(proposer, &decision(), &Context::new()).await;
        }
        resolution.finish(stability, &decision())
    }

    fn decision() -> Decision {
        Decision {
            decision_type: DecisionType::Modify,
            recommended_action: "Phase in tariffs".to_string(),
            confidence: 0.7,
            risk_score: 4,
            rationale_summary: vec![],
            assumptions: vec![],
        }
    }

    #[tokio::test]
    async fn test_runs_to_step_bound() {
        let proposer = Replies::new(vec![]);
        let report = drive(Resolution::new(3), &proposer, &FixedStability(0.6)).await;
        assert_eq!(report.step_count, 3);
        assert_eq!(report.outcome, ResolutionOutcome::Completed);
        assert_eq!(report.stability_score, 0.6);
        assert_eq!(report.trace[2].index, 3);
        assert_eq!(*proposer.seen_trace_lens.lock(), vec![0, 1, 2]);
        assert_eq!(
            report.summary,
            "Turn 1 [Council]: Hold\nTurn 2 [Council]: Hold\nTurn 3 [Council]: Hold"
        );
    }

    #[tokio::test]
    async fn test_unparseable_step_crashes() {
        let proposer = Replies::new(vec![
            Ok(json!({"actor": "Port Authority", "action": "Inspect cargo"})),
            Ok(json!("the actors shrug")),
        ]);
        let report = drive(Resolution::new(5), &proposer, &FixedStability::default()).await;
        assert_eq!(report.step_count, 1);
        assert!(report.outcome.is_crash());
        match &report.outcome {
            ResolutionOutcome::Crash { reason } => assert!(reason.starts_with("step 2")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(proposer.seen_trace_lens.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_proposer_error_crashes() {
        let proposer = Replies::new(vec![Err(CollaboratorError::Unavailable("offline".into()))]);
        let report = drive(Resolution::new(3), &proposer, &FixedStability::default()).await;
        assert_eq!(report.step_count, 0);
        assert!(report.outcome.is_crash());
        assert_eq!(report.summary, "");
    }

    #[tokio::test]
    async fn test_zero_steps_completes_immediately() {
        let proposer = Replies::new(vec![]);
        let report = drive(Resolution::new(0), &proposer, &FixedStability::default()).await;
        assert_eq!(report.step_count, 0);
        assert_eq!(report.outcome, ResolutionOutcome::Completed);
        assert!(proposer.seen_trace_lens.lock().is_empty());
    }

    #[tokio::test]
    async fn test_halt_keeps_first_reason() {
        let mut resolution = Resolution::new(3);
        resolution.halt("cancelled");
        resolution.halt("deadline exceeded");
        assert!(resolution.is_finished());
        let report = resolution.finish(&FixedStability::default(), &decision());
        assert_eq!(
            report.outcome,
            ResolutionOutcome::Crash {
                reason: "cancelled".to_string()
            }
        );
    }
}
