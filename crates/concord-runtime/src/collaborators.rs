//! Collaborator traits consumed by the coordinator.
//!
//! Every external capability a run depends on is a trait object injected
//! into the [`Coordinator`](crate::Coordinator). None of them is trusted:
//! replies are validated by the coordinator, and failures are absorbed into
//! typed results rather than escaping the run.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use concord_core::{
    CompositeDecision, ConstraintResult, Context, Decision, Fault, JudgmentResult, PlanDraft,
    ResolutionOutcome, ResolutionStep, Role,
};

/// Errors from planner, constraint, judgment and step collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Breaks a request into specialist steps.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &str, context: &Context) -> Result<PlanDraft, CollaboratorError>;
}

/// One specialist evaluation.
///
/// Implementations return the raw reply; the coordinator decides whether it
/// is a decision, a salvageable signal, or a schema fault. Timeouts and
/// retries belong to the implementation (see
/// [`EvaluatorEnvelope`](crate::resilience::EvaluatorEnvelope)).
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, role: Role, instruction: &str, context: &Context)
        -> Result<Value, Fault>;
}

/// Checks a composite decision against hard constraints.
#[async_trait]
pub trait ConstraintChecker: Send + Sync {
    /// `feedback` is the previous judgment's rejection reason, if any.
    async fn check(
        &self,
        decision: &CompositeDecision,
        feedback: Option<&str>,
    ) -> Result<ConstraintResult, CollaboratorError>;
}

/// Approves or rejects a checked composite decision.
#[async_trait]
pub trait JudgmentArbiter: Send + Sync {
    async fn judge(
        &self,
        decision: &CompositeDecision,
        constraint: &ConstraintResult,
    ) -> Result<JudgmentResult, CollaboratorError>;
}

/// Proposes the next move of the resolution phase.
///
/// The reply is raw; it must parse into an actor and an action or the
/// resolution phase ends with a crash marker.
#[async_trait]
pub trait StepProposer: Send + Sync {
    async fn propose_step(
        &self,
        decision: &Decision,
        trace: &[ResolutionStep],
        context: &Context,
    ) -> Result<Value, CollaboratorError>;
}

/// Scores how stable a finished resolution trace is.
///
/// The score is opaque to the coordinator and carried through unchanged.
pub trait StabilityPolicy: Send + Sync {
    fn score(&self, decision: &Decision, trace: &[ResolutionStep], outcome: &ResolutionOutcome)
        -> f64;
}

/// Stability policy that always reports the same score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedStability(pub f64);

impl Default for FixedStability {
    fn default() -> Self {
        Self(1.0)
    }
}

impl StabilityPolicy for FixedStability {
    fn score(&self, _: &Decision, _: &[ResolutionStep], _: &ResolutionOutcome) -> f64 {
        self.0
    }
}
