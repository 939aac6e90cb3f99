//! Run bookkeeping: the coordinator's working record and the final report.
//!
//! A [`RunState`] is owned by exactly one run. It is consumed by
//! [`RunState::finalize`], which freezes it into an immutable
//! [`FinalReport`] whose status is derived from what actually happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{
    AggregationPath, CompositeDecision, ConstraintResult, Context, Decision, JudgmentResult,
    Plan, ResolutionReport, SpecialistResult,
};

/// Coordinator phases, in the order a complete run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Planning,
    Specialists,
    Aggregating,
    ConstraintCheck,
    Judgment,
    Resolution,
    Finalize,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "PLANNING",
            Phase::Specialists => "SPECIALISTS",
            Phase::Aggregating => "AGGREGATING",
            Phase::ConstraintCheck => "CONSTRAINT_CHECK",
            Phase::Judgment => "JUDGMENT",
            Phase::Resolution => "RESOLUTION",
            Phase::Finalize => "FINALIZE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase boundary with the time it was crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMark {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Degraded,
    Rejected,
    SystemError,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::PartialSuccess => "PARTIAL_SUCCESS",
            RunStatus::Degraded => "DEGRADED",
            RunStatus::Rejected => "REJECTED",
            RunStatus::SystemError => "SYSTEM_ERROR",
        }
    }

    /// Whether the run ended without an actionable decision.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Rejected | RunStatus::SystemError)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped before its natural end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interruption::Cancelled => f.write_str("cancelled"),
            Interruption::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// One constraint check and the judgment that followed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRound {
    /// Zero-based judgment attempt.
    pub attempt: u32,
    pub constraint: ConstraintResult,
    pub judgment: JudgmentResult,
}

/// The coordinator's working record for one run.
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: Uuid,
    request: String,
    context: Context,
    retry_bound: u32,
    seed: Option<u64>,
    started_at: DateTime<Utc>,
    phases: Vec<PhaseMark>,
    plan: Option<Plan>,
    system_error: Option<String>,
    specialist_results: Vec<SpecialistResult>,
    composite: Option<CompositeDecision>,
    reviews: Vec<ReviewRound>,
    retry_count: u32,
    retries_exhausted: bool,
    final_decision: Option<Decision>,
    resolution: Option<ResolutionReport>,
    interruption: Option<Interruption>,
}

impl RunState {
    pub fn new(request: impl Into<String>, context: Context, retry_bound: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request: request.into(),
            context,
            retry_bound,
            seed: None,
            started_at: Utc::now(),
            phases: Vec::new(),
            plan: None,
            system_error: None,
            specialist_results: Vec::new(),
            composite: None,
            reviews: Vec::new(),
            retry_count: 0,
            retries_exhausted: false,
            final_decision: None,
            resolution: None,
            interruption: None,
        }
    }

    /// Attach the seed the run's collaborators were driven with.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn reviews(&self) -> &[ReviewRound] {
        &self.reviews
    }

    pub fn final_decision(&self) -> Option<&Decision> {
        self.final_decision.as_ref()
    }

    /// Phase most recently entered.
    pub fn current_phase(&self) -> Option<Phase> {
        self.phases.last().map(|m| m.phase)
    }

    /// Record a phase boundary and return its timestamp.
    pub fn enter(&mut self, phase: Phase) -> DateTime<Utc> {
        let entered_at = Utc::now();
        self.phases.push(PhaseMark { phase, entered_at });
        entered_at
    }

    pub fn set_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
    }

    /// Record a failure that makes the run unable to produce a decision.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.system_error = Some(reason.into());
    }

    pub fn set_specialist_results(&mut self, results: Vec<SpecialistResult>) {
        self.specialist_results = results;
    }

    pub fn set_composite(&mut self, composite: CompositeDecision) {
        self.composite = Some(composite);
    }

    /// Record a review round. Returns `true` when another attempt is allowed.
    ///
    /// An approval ends the loop. A rejection consumes one retry while the
    /// bound allows it; otherwise the retries are exhausted.
    pub fn record_review(&mut self, round: ReviewRound) -> bool {
        let judgment = &round.judgment;
        let retry = if judgment.is_approved {
            self.final_decision = judgment.final_decision.clone();
            false
        } else if self.retry_count < self.retry_bound {
            self.retry_count += 1;
            true
        } else {
            self.retries_exhausted = true;
            false
        };
        self.reviews.push(round);
        retry
    }

    pub fn set_resolution(&mut self, report: ResolutionReport) {
        self.resolution = Some(report);
    }

    /// Mark the run as interrupted. The first interruption wins.
    pub fn interrupt(&mut self, reason: Interruption) {
        if self.interruption.is_none() {
            self.interruption = Some(reason);
        }
    }

    pub fn interruption(&self) -> Option<Interruption> {
        self.interruption
    }

    /// Derive the terminal status from what the run recorded.
    pub fn status(&self) -> RunStatus {
        if self.system_error.is_some() {
            return RunStatus::SystemError;
        }
        if self.retries_exhausted {
            return RunStatus::Rejected;
        }

        let path = self.composite.as_ref().map(|c| c.path);
        if self.interruption.is_some() || path == Some(AggregationPath::NoEvidence) {
            return RunStatus::Degraded;
        }

        let any_fault = self.specialist_results.iter().any(|r| r.fault().is_some());
        let crashed = self
            .resolution
            .as_ref()
            .map(|r| r.outcome.is_crash())
            .unwrap_or(false);
        if any_fault || crashed || path == Some(AggregationPath::Salvaged) {
            return RunStatus::PartialSuccess;
        }

        RunStatus::Success
    }

    /// Freeze the run into its final report.
    pub fn finalize(mut self) -> FinalReport {
        let finished_at = self.enter(Phase::Finalize);
        let status = self.status();

        FinalReport {
            run_id: self.run_id,
            status,
            request: self.request,
            context: self.context,
            plan: self.plan,
            specialist_results: self.specialist_results,
            composite: self.composite,
            reviews: self.reviews,
            retry_count: self.retry_count,
            seed: self.seed,
            final_decision: self.final_decision,
            resolution: self.resolution,
            interruption: self.interruption,
            error: self.system_error,
            phases: self.phases,
            started_at: self.started_at,
            finished_at,
        }
    }
}

/// Immutable record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub request: String,
    #[serde(default)]
    pub context: Context,
    pub plan: Option<Plan>,
    #[serde(default)]
    pub specialist_results: Vec<SpecialistResult>,
    pub composite: Option<CompositeDecision>,
    #[serde(default)]
    pub reviews: Vec<ReviewRound>,
    pub retry_count: u32,
    /// Seed for replaying the run, when one was given.
    #[serde(default)]
    pub seed: Option<u64>,
    /// The decision judgment approved, if any.
    pub final_decision: Option<Decision>,
    pub resolution: Option<ResolutionReport>,
    pub interruption: Option<Interruption>,
    /// Cause of a SYSTEM_ERROR status.
    pub error: Option<String>,
    pub phases: Vec<PhaseMark>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FinalReport {
    /// Phases visited, in order.
    pub fn phase_sequence(&self) -> Vec<Phase> {
        self.phases.iter().map(|m| m.phase).collect()
    }
}
