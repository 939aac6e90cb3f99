//! Data model shared by the aggregator, the coordinator and the report.
//!
//! Every type here is plain data: serde-serializable, cloneable and free of
//! behaviour beyond small constructors and accessors. Validation lives in
//! [`crate::validation`], interpretation of raw collaborator replies in
//! [`crate::salvage`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scenario context handed to collaborators.
///
/// A `BTreeMap` keeps key order stable so identical inputs serialize
/// identically.
pub type Context = BTreeMap<String, serde_json::Value>;

/// Upper bound on `rationale_summary` and `summary_points` lengths.
pub const MAX_RATIONALE_LINES: usize = 3;

/// Highest admissible risk score.
pub const MAX_RISK_SCORE: u8 = 10;

/// The five outcomes a decision can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    Approve,
    Reject,
    Modify,
    Escalate,
    Abort,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Approve => "APPROVE",
            DecisionType::Reject => "REJECT",
            DecisionType::Modify => "MODIFY",
            DecisionType::Escalate => "ESCALATE",
            DecisionType::Abort => "ABORT",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An actionable decision, produced by a specialist, the aggregator or the
/// judgment arbiter. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: DecisionType,

    pub recommended_action: String,

    /// In `[0, 1]`
    pub confidence: f64,

    /// In `[0, 10]`
    pub risk_score: u8,

    /// At most [`MAX_RATIONALE_LINES`] entries, most important first
    #[serde(default)]
    pub rationale_summary: Vec<String>,

    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl Decision {
    /// First rationale line, or an empty string when there is none.
    pub fn lead_rationale(&self) -> &str {
        self.rationale_summary
            .first()
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Specialist perspectives. The set is closed: plans naming anything else
/// are rejected during plan validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Risk and stability
    RiskStability,
    /// Feasibility and capability
    FeasibilityCapability,
    /// Cost and incentives
    CostIncentive,
}

impl Role {
    pub const ALL: [Role; 3] = [
        Role::RiskStability,
        Role::FeasibilityCapability,
        Role::CostIncentive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::RiskStability => "risk_stability",
            Role::FeasibilityCapability => "feasibility_capability",
            Role::CostIncentive => "cost_incentive",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role name that does not resolve to any [`Role`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown specialist role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "risk_stability" | "risk" | "stability" | "security" => Ok(Role::RiskStability),
            "feasibility_capability" | "feasibility" | "capability" | "technology" => {
                Ok(Role::FeasibilityCapability)
            }
            "cost_incentive" | "cost" | "incentive" | "economics" => Ok(Role::CostIncentive),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Why an evaluator failed to produce anything usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    SchemaError,
    Timeout,
    RateLimit,
    SystemError,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FaultKind::SchemaError => "SCHEMA_ERROR",
            FaultKind::Timeout => "TIMEOUT",
            FaultKind::RateLimit => "RATE_LIMIT",
            FaultKind::SystemError => "SYSTEM_ERROR",
        })
    }
}

/// A per-role evaluator failure. Absorbed by aggregation, never escalated
/// to a run-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(FaultKind::SchemaError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FaultKind::RateLimit, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(FaultKind::SystemError, message)
    }
}

/// Partial intelligence salvaged when a full decision could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub summary_points: Vec<String>,

    pub confidence: f64,

    /// In `[-2, 2]`
    pub inferred_risk_delta: i8,
}

/// What a single specialist produced. Exactly one variant by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistOutcome {
    Decision(Decision),
    Signal(Signal),
    Fault(Fault),
}

/// A specialist outcome tagged with the role and plan step it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub role: Role,
    pub step_id: String,
    pub outcome: SpecialistOutcome,
}

impl SpecialistResult {
    pub fn new(role: Role, step_id: impl Into<String>, outcome: SpecialistOutcome) -> Self {
        Self {
            role,
            step_id: step_id.into(),
            outcome,
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match &self.outcome {
            SpecialistOutcome::Decision(d) => Some(d),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<&Signal> {
        match &self.outcome {
            SpecialistOutcome::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match &self.outcome {
            SpecialistOutcome::Fault(f) => Some(f),
            _ => None,
        }
    }
}

/// Which aggregation rule produced a [`CompositeDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationPath {
    /// Median risk with majority vote
    Standard,
    /// At least two qualifying ABORTs
    AbortQuorum,
    /// Fewer than two decisions, at least one signal
    Salvaged,
    /// No decisions and no signals
    NoEvidence,
}

/// The single reconciled decision for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDecision {
    pub primary: Decision,

    /// Agreement strength among contributing roles, not a probability
    pub consensus_score: f64,

    /// Exact computed risk before rounding into `primary.risk_score`
    pub calibrated_risk: f64,

    pub path: AggregationPath,

    #[serde(default)]
    pub conflicts: Vec<String>,

    pub inputs: Vec<SpecialistResult>,
}

/// Outcome of the constraint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintResult {
    pub is_safe: bool,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default)]
    pub ethical_flags: Vec<String>,

    #[serde(default)]
    pub legal_flags: Vec<String>,

    /// A modified decision the checker would accept instead
    #[serde(default)]
    pub sanitized: Option<Decision>,

    /// Retries already spent when this check ran
    #[serde(default)]
    pub retry_count: u32,

    /// Judgment feedback this check was given
    #[serde(default)]
    pub prior_feedback: Option<String>,
}

impl ConstraintResult {
    /// Fail-closed result used when the checker itself could not answer.
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Self {
            is_safe: false,
            warnings: vec![format!("constraint check unavailable: {}", reason)],
            ethical_flags: Vec::new(),
            legal_flags: Vec::new(),
            sanitized: None,
            retry_count: 0,
            prior_feedback: None,
        }
    }
}

/// Outcome of the judgment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentResult {
    pub is_approved: bool,

    /// Required when not approved
    #[serde(default)]
    pub feedback: String,

    /// Required when approved
    #[serde(default)]
    pub final_decision: Option<Decision>,
}

impl JudgmentResult {
    /// Fail-closed result used when the arbiter could not answer or answered
    /// with something malformed.
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Self {
            is_approved: false,
            feedback: format!("judgment unavailable: {}", reason),
            final_decision: None,
        }
    }
}

/// A plan step as returned by the planner, before role resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftStep {
    pub id: String,
    pub role: String,
    pub objective: String,
}

/// A plan as returned by the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub steps: Vec<DraftStep>,
}

/// A validated plan step bound to a concrete role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub role: Role,
    pub objective: String,
}

/// A validated plan: at least one step, unique ids, known roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Distinct roles in first-appearance order.
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = Vec::new();
        for step in &self.steps {
            if !roles.contains(&step.role) {
                roles.push(step.role);
            }
        }
        roles
    }
}

/// One parsed actor move during the resolution phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProposal {
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub outcome: String,
}

/// A trace entry: a proposal plus its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStep {
    /// 1-based
    pub index: u32,
    pub actor: String,
    pub action: String,
    pub outcome: String,
}

impl ResolutionStep {
    /// One summary line, e.g. `Turn 2 [Actor B]: hold position`.
    pub fn summary_line(&self) -> String {
        format!("Turn {} [{}]: {}", self.index, self.actor, self.action)
    }
}

/// How the resolution phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionOutcome {
    Completed,
    Crash { reason: String },
}

impl ResolutionOutcome {
    pub fn is_crash(&self) -> bool {
        matches!(self, ResolutionOutcome::Crash { .. })
    }
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionOutcome::Completed => f.write_str("COMPLETED"),
            ResolutionOutcome::Crash { reason } => write!(f, "CRASH: {}", reason),
        }
    }
}

/// Final artifact of the resolution phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub trace: Vec<ResolutionStep>,
    pub step_count: u32,
    pub outcome: ResolutionOutcome,
    /// Supplied by policy outside the core and carried through unchanged
    pub stability_score: f64,
    pub summary: String,
}
