//! Structural validation for everything a collaborator hands back.
//!
//! Collaborators are untrusted: a value that deserializes is not yet a value
//! the coordinator may act on. Each check returns the first violation found.

use std::collections::HashSet;
use thiserror::Error;

use crate::types::{
    Decision, JudgmentResult, Plan, PlanDraft, PlanStep, Role, Signal, StepProposal,
    MAX_RATIONALE_LINES, MAX_RISK_SCORE,
};

/// A collaborator value that failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("{field} has {len} entries, at most {max} allowed")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("duplicate plan step id: {0}")]
    DuplicateStep(String),

    #[error("step {step}: {source}")]
    UnknownRole {
        step: String,
        #[source]
        source: crate::types::UnknownRole,
    },

    #[error("no evaluator registered for role {0}")]
    UnavailableRole(Role),
}

/// Implemented by values that must be checked before use.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
        })
    }
}

fn check_lines(field: &'static str, lines: &[String]) -> Result<(), ValidationError> {
    if lines.len() > MAX_RATIONALE_LINES {
        return Err(ValidationError::TooLong {
            field,
            len: lines.len(),
            max: MAX_RATIONALE_LINES,
        });
    }
    Ok(())
}

impl Validate for Decision {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.recommended_action.trim().is_empty() {
            return Err(ValidationError::MissingField("recommended_action"));
        }
        check_unit_interval("confidence", self.confidence)?;
        if self.risk_score > MAX_RISK_SCORE {
            return Err(ValidationError::OutOfRange {
                field: "risk_score",
                value: self.risk_score.to_string(),
            });
        }
        check_lines("rationale_summary", &self.rationale_summary)
    }
}

impl Validate for Signal {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.summary_points.iter().all(|p| p.trim().is_empty()) {
            return Err(ValidationError::MissingField("summary_points"));
        }
        check_lines("summary_points", &self.summary_points)?;
        check_unit_interval("confidence", self.confidence)?;
        if !(-2..=2).contains(&self.inferred_risk_delta) {
            return Err(ValidationError::OutOfRange {
                field: "inferred_risk_delta",
                value: self.inferred_risk_delta.to_string(),
            });
        }
        Ok(())
    }
}

impl Validate for JudgmentResult {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.is_approved {
            match &self.final_decision {
                Some(decision) => decision.validate(),
                None => Err(ValidationError::MissingField("final_decision")),
            }
        } else if self.feedback.trim().is_empty() {
            Err(ValidationError::MissingField("feedback"))
        } else {
            Ok(())
        }
    }
}

impl Validate for StepProposal {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.actor.trim().is_empty() {
            return Err(ValidationError::MissingField("actor"));
        }
        if self.action.trim().is_empty() {
            return Err(ValidationError::MissingField("action"));
        }
        Ok(())
    }
}

impl PlanDraft {
    /// Resolve every role name once and check the plan is runnable.
    ///
    /// `available` reports whether an evaluator exists for a role; a step
    /// naming a role nobody can evaluate is a planning failure rather than a
    /// silently dropped step.
    pub fn resolve(&self, available: impl Fn(Role) -> bool) -> Result<Plan, ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for draft in &self.steps {
            if draft.id.trim().is_empty() {
                return Err(ValidationError::MissingField("steps[].id"));
            }
            if !seen.insert(draft.id.as_str()) {
                return Err(ValidationError::DuplicateStep(draft.id.clone()));
            }

            let role: Role = draft
                .role
                .parse()
                .map_err(|source| ValidationError::UnknownRole {
                    step: draft.id.clone(),
                    source,
                })?;
            if !available(role) {
                return Err(ValidationError::UnavailableRole(role));
            }

            steps.push(PlanStep {
                id: draft.id.clone(),
                role,
                objective: draft.objective.clone(),
            });
        }

        Ok(Plan { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionType, DraftStep};

    fn decision() -> Decision {
        Decision {
            decision_type: DecisionType::Approve,
            recommended_action: "Proceed".to_string(),
            confidence: 0.8,
            risk_score: 3,
            rationale_summary: vec!["Low exposure".to_string()],
            assumptions: vec![],
        }
    }

    fn draft(steps: &[(&str, &str)]) -> PlanDraft {
        PlanDraft {
            steps: steps
                .iter()
                .map(|(id, role)| DraftStep {
                    id: id.to_string(),
                    role: role.to_string(),
                    objective: "Assess".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_valid_decision_passes() {
        assert!(decision().validate().is_ok());
    }

    #[test]
    fn test_decision_bounds() {
        let mut d = decision();
        d.confidence = 1.2;
        assert!(matches!(
            d.validate(),
            Err(ValidationError::OutOfRange { field: "confidence", .. })
        ));

        let mut d = decision();
        d.risk_score = 11;
        assert!(matches!(
            d.validate(),
            Err(ValidationError::OutOfRange { field: "risk_score", .. })
        ));

        let mut d = decision();
        d.rationale_summary = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert!(matches!(d.validate(), Err(ValidationError::TooLong { len: 4, .. })));

        let mut d = decision();
        d.confidence = f64::NAN;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_signal_delta_bounds() {
        let signal = Signal {
            summary_points: vec!["Escalating tension".to_string()],
            confidence: 0.5,
            inferred_risk_delta: 3,
        };
        assert!(matches!(
            signal.validate(),
            Err(ValidationError::OutOfRange { field: "inferred_risk_delta", .. })
        ));
    }

    #[test]
    fn test_judgment_requirements() {
        let approved_without_decision = JudgmentResult {
            is_approved: true,
            feedback: String::new(),
            final_decision: None,
        };
        assert_eq!(
            approved_without_decision.validate(),
            Err(ValidationError::MissingField("final_decision"))
        );

        let rejected_without_feedback = JudgmentResult {
            is_approved: false,
            feedback: "  ".to_string(),
            final_decision: None,
        };
        assert_eq!(
            rejected_without_feedback.validate(),
            Err(ValidationError::MissingField("feedback"))
        );
    }

    #[test]
    fn test_plan_resolution() {
        let plan = draft(&[("1", "security"), ("2", "cost")])
            .resolve(|_| true)
            .unwrap();
        assert_eq!(plan.steps[0].role, Role::RiskStability);
        assert_eq!(plan.steps[1].role, Role::CostIncentive);
    }

    #[test]
    fn test_plan_rejects_unknown_and_unavailable_roles() {
        let err = draft(&[("1", "astrology")]).resolve(|_| true).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownRole { .. }));

        let err = draft(&[("1", "risk")])
            .resolve(|role| role != Role::RiskStability)
            .unwrap_err();
        assert_eq!(err, ValidationError::UnavailableRole(Role::RiskStability));
    }

    #[test]
    fn test_plan_rejects_empty_and_duplicates() {
        assert_eq!(PlanDraft::default().resolve(|_| true), Err(ValidationError::EmptyPlan));
        assert_eq!(
            draft(&[("1", "risk"), ("1", "cost")]).resolve(|_| true),
            Err(ValidationError::DuplicateStep("1".to_string()))
        );
    }
}
