//! # concord-core
//!
//! Deterministic decision model for Concord.
//!
//! This crate holds everything about a run that does not need a clock on the
//! wall or a network on the other end:
//! - What did each specialist say, and can it be trusted?
//! - What single decision do their answers add up to?
//! - What status does the finished run deserve?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: aggregation of the same results always yields the
//!    same composite, rationale order included
//! 2. **Total**: aggregation never fails on a non-empty input; faults and
//!    partial replies are encoded, not raised
//! 3. **Conservative**: ABORT requires a quorum, and absence of information
//!    is never reported as danger
//! 4. **Bounded**: rationale never exceeds three lines
//!
//! ## Example
//!
//! ```rust,ignore
//! use concord_core::{aggregate, interpret_reply, Role};
//!
//! let results = vec![
//!     interpret_reply(Role::RiskStability, "1", Ok(risk_reply)),
//!     interpret_reply(Role::CostIncentive, "2", Ok(cost_reply)),
//! ];
//! let composite = aggregate(&results).expect("non-empty input");
//! println!("{} at risk {}", composite.primary.decision_type, composite.primary.risk_score);
//! ```

pub mod aggregator;
pub mod duration;
pub mod run;
pub mod salvage;
pub mod scenario;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use aggregator::{aggregate, Aggregator};
pub use run::{FinalReport, Interruption, Phase, PhaseMark, ReviewRound, RunState, RunStatus};
pub use salvage::{classify, interpret_reply, interpret_step, screen_result};
pub use scenario::{
    ResolutionScript, Scenario, ScenarioError, ScenarioOptions, Scripted, ScriptedReply,
};
pub use types::{
    AggregationPath, CompositeDecision, ConstraintResult, Context, Decision, DecisionType,
    DraftStep, Fault, FaultKind, JudgmentResult, Plan, PlanDraft, PlanStep, ResolutionOutcome,
    ResolutionReport, ResolutionStep, Role, Signal, SpecialistOutcome, SpecialistResult,
    StepProposal, UnknownRole, MAX_RATIONALE_LINES,
};
pub use validation::{Validate, ValidationError};
