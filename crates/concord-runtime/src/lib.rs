//! # concord-runtime
//!
//! Async coordination for Concord.
//!
//! `concord-core` decides what specialist answers add up to. This crate gets
//! those answers: it drives a run through planning, specialist fan-out,
//! aggregation, a bounded constraint/judgment review loop and a step-wise
//! resolution phase, against collaborators injected behind traits.
//!
//! ## Important
//!
//! Every run ends in a [`FinalReport`](concord_core::FinalReport). Collaborator
//! failures are absorbed into typed results; cancellation and deadlines force
//! an early FINALIZE with whatever the run had gathered.
//!
//! Collaborators that talk to real backends can be wrapped in an
//! [`EvaluatorEnvelope`] (timeouts, rate-limit backoff, per-role circuit
//! breaker) and a [`CachingEvaluator`]; the coordinator never knows.
//!
//! ## Example
//!
//! ```rust,ignore
//! use concord_core::Scenario;
//! use concord_runtime::{RunOptions, ScriptedCollaborators};
//!
//! let scenario = Scenario::from_file("scenarios/port.yaml")?;
//! let collaborators = ScriptedCollaborators::from_scenario(&scenario)?;
//! let coordinator = collaborators.builder().build()?;
//!
//! let report = coordinator
//!     .run_scenario(&scenario.request, scenario.context.clone(), &RunOptions::default())
//!     .await;
//! println!("{}", report.status);
//! ```

pub mod archive;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod resilience;
pub mod resolution;
pub mod scripted;

pub use archive::{ArchiveError, FileArchive, ReportArchive};
pub use cache::{CacheConfig, CachingEvaluator};
pub use collaborators::{
    CollaboratorError, ConstraintChecker, Evaluator, FixedStability, JudgmentArbiter, Planner,
    StabilityPolicy, StepProposer,
};
pub use config::{ConfigError, RunOptions, RuntimeConfig};
pub use control::{cancellation, CancelHandle, CancelSignal, ProgressEvent, RunControls};
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, EnvelopeConfig, EvaluatorEnvelope};
pub use resolution::Resolution;
pub use scripted::ScriptedCollaborators;
