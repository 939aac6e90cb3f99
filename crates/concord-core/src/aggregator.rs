//! Aggregator: merges specialist results into one composite decision.
//!
//! Rules, in priority order:
//! 1. Fewer than two decisions but at least one signal → salvaged MODIFY,
//!    risk clamped to `[1, 7]`, fixed low consensus.
//! 2. No decisions and no signals → conservative MODIFY with zero risk and
//!    zero confidence. Absence of information is not evidence of danger.
//! 3. Otherwise risk is the median of decided risks. ABORT wins only when at
//!    least two independent ABORTs each carry risk ≥ 8 and confidence ≥ 0.6.
//!    Failing that: median ≥ 7 → REJECT, unanimous APPROVE → APPROVE, else
//!    the most frequent type (first occurrence breaks ties).
//!
//! The aggregator is pure: no I/O, no clock, no hashing. The same input
//! always yields the same output, rationale order included.

use crate::types::{
    AggregationPath, CompositeDecision, Decision, DecisionType, Fault, Signal,
    SpecialistResult, MAX_RATIONALE_LINES,
};

/// Risk assumed when salvaging signals without any decided baseline.
pub const BASELINE_RISK: f64 = 3.0;

/// Salvaged risk may never leave this range.
pub const SALVAGED_RISK_RANGE: (f64, f64) = (1.0, 7.0);

/// Consensus reported on the salvaged path.
pub const SALVAGED_CONSENSUS: f64 = 0.4;

/// Minimum number of qualifying ABORTs to override.
pub const ABORT_QUORUM: usize = 2;

pub const ABORT_MIN_RISK: u8 = 8;

pub const ABORT_MIN_CONFIDENCE: f64 = 0.6;

/// Median risk at or above which the composite is REJECT.
pub const REJECT_RISK: f64 = 7.0;

const SALVAGED_ACTION: &str = "Adaptive Response (Salvaged Intelligence)";
const NO_EVIDENCE_ACTION: &str = "System Degraded: proceeding with conservative baseline";
const FAULT_EXCERPT_CHARS: usize = 50;

type Decided<'a> = (&'a SpecialistResult, &'a Decision);
type Signaled<'a> = (&'a SpecialistResult, &'a Signal);
type Faulted<'a> = (&'a SpecialistResult, &'a Fault);

/// The aggregator merges specialist results into a [`CompositeDecision`].
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate specialist results.
    ///
    /// Returns `None` only for an empty input: a composite is never built
    /// from nothing, and the caller must handle that case as a terminal
    /// fallback.
    pub fn aggregate(&self, results: &[SpecialistResult]) -> Option<CompositeDecision> {
        if results.is_empty() {
            return None;
        }

        let mut decided: Vec<Decided> = Vec::new();
        let mut signaled: Vec<Signaled> = Vec::new();
        let mut faulted: Vec<Faulted> = Vec::new();

        for result in results {
            if let Some(d) = result.decision() {
                decided.push((result, d));
            } else if let Some(s) = result.signal() {
                signaled.push((result, s));
            } else if let Some(f) = result.fault() {
                faulted.push((result, f));
            }
        }

        let composite = if decided.len() < 2 && !signaled.is_empty() {
            self.salvage(&decided, &signaled, results)
        } else if decided.is_empty() {
            self.no_evidence(&faulted, results)
        } else {
            // A lone decision without signals is its own median.
            self.standard(&decided, &faulted, results)
        };

        Some(composite)
    }

    /// Rule 1: degraded intelligence.
    fn salvage(
        &self,
        decided: &[Decided],
        signaled: &[Signaled],
        results: &[SpecialistResult],
    ) -> CompositeDecision {
        let base_risk = if decided.is_empty() {
            BASELINE_RISK
        } else {
            mean(decided.iter().map(|(_, d)| f64::from(d.risk_score)))
        };
        let risk_delta: i32 = signaled
            .iter()
            .map(|(_, s)| i32::from(s.inferred_risk_delta))
            .sum();

        let (floor, ceiling) = SALVAGED_RISK_RANGE;
        let calibrated = (base_risk + f64::from(risk_delta)).clamp(floor, ceiling);

        let mut rationale = Vec::new();
        if let Some((_, primary)) = decided.first() {
            rationale.push(format!("Primary: {}", primary.recommended_action));
        }
        for (result, signal) in signaled {
            rationale.push(format!(
                "Signal ({}): {}",
                result.role,
                signal.summary_points.join("; ")
            ));
        }
        rationale.truncate(MAX_RATIONALE_LINES);

        CompositeDecision {
            primary: Decision {
                decision_type: DecisionType::Modify,
                recommended_action: SALVAGED_ACTION.to_string(),
                confidence: (0.3 + 0.1 * signaled.len() as f64).min(1.0),
                risk_score: calibrated.trunc() as u8,
                rationale_summary: rationale,
                assumptions: Vec::new(),
            },
            consensus_score: SALVAGED_CONSENSUS,
            calibrated_risk: calibrated,
            path: AggregationPath::Salvaged,
            conflicts: Vec::new(),
            inputs: results.to_vec(),
        }
    }

    /// Rule 2: nothing usable came back.
    fn no_evidence(&self, faulted: &[Faulted], results: &[SpecialistResult]) -> CompositeDecision {
        let rationale = faulted
            .iter()
            .take(MAX_RATIONALE_LINES)
            .map(|(result, fault)| format!("Fault ({}): {}", result.role, excerpt(&fault.message)))
            .collect();

        CompositeDecision {
            primary: Decision {
                decision_type: DecisionType::Modify,
                recommended_action: NO_EVIDENCE_ACTION.to_string(),
                confidence: 0.0,
                risk_score: 0,
                rationale_summary: rationale,
                assumptions: Vec::new(),
            },
            consensus_score: 0.0,
            calibrated_risk: 0.0,
            path: AggregationPath::NoEvidence,
            conflicts: Vec::new(),
            inputs: results.to_vec(),
        }
    }

    /// Rule 3: median risk, abort quorum, then majority.
    fn standard(
        &self,
        decided: &[Decided],
        faulted: &[Faulted],
        results: &[SpecialistResult],
    ) -> CompositeDecision {
        let total = decided.len() as f64;
        let median_risk = median(decided.iter().map(|(_, d)| d.risk_score).collect());

        let qualifying: Vec<Decided> = decided
            .iter()
            .copied()
            .filter(|(_, d)| qualifies_for_abort(d))
            .collect();

        let (primary_type, calibrated, path, consensus, representative) =
            if qualifying.len() >= ABORT_QUORUM {
                let max_risk = qualifying
                    .iter()
                    .map(|(_, d)| d.risk_score)
                    .max()
                    .unwrap_or(ABORT_MIN_RISK);
                let calibrated = f64::from(max_risk);
                (
                    DecisionType::Abort,
                    calibrated,
                    AggregationPath::AbortQuorum,
                    qualifying.len() as f64 / total,
                    closest_to(&qualifying, calibrated),
                )
            } else {
                let primary_type = self.resolve_type(decided, median_risk);
                let agreeing = decided
                    .iter()
                    .filter(|(_, d)| voting_type(d) == primary_type)
                    .count();
                (
                    primary_type,
                    median_risk,
                    AggregationPath::Standard,
                    agreeing as f64 / total,
                    closest_to(decided, median_risk),
                )
            };

        let mut rationale: Vec<String> = decided
            .iter()
            .map(|(result, d)| {
                format!("{}: risk {}: {}", result.role, d.risk_score, d.lead_rationale())
            })
            .collect();
        if !faulted.is_empty() {
            rationale.push(format!("Warning: {} specialist(s) faulted", faulted.len()));
        }
        rationale.truncate(MAX_RATIONALE_LINES);

        CompositeDecision {
            primary: Decision {
                decision_type: primary_type,
                recommended_action: representative.recommended_action.clone(),
                confidence: mean(decided.iter().map(|(_, d)| d.confidence)),
                risk_score: calibrated.round() as u8,
                rationale_summary: rationale,
                assumptions: representative.assumptions.clone(),
            },
            consensus_score: consensus,
            calibrated_risk: calibrated,
            path,
            conflicts: self.conflicts(decided, primary_type, path),
            inputs: results.to_vec(),
        }
    }

    /// Pick the primary type when the abort quorum does not hold.
    fn resolve_type(&self, decided: &[Decided], median_risk: f64) -> DecisionType {
        if median_risk >= REJECT_RISK {
            return DecisionType::Reject;
        }
        if decided
            .iter()
            .all(|(_, d)| d.decision_type == DecisionType::Approve)
        {
            return DecisionType::Approve;
        }

        // Counts in first-occurrence order so ties resolve to the earliest.
        let mut tally: Vec<(DecisionType, usize)> = Vec::new();
        for (_, d) in decided {
            let vote = voting_type(d);
            match tally.iter_mut().find(|(t, _)| *t == vote) {
                Some((_, count)) => *count += 1,
                None => tally.push((vote, 1)),
            }
        }

        let mut winner = tally[0];
        for entry in &tally[1..] {
            if entry.1 > winner.1 {
                winner = *entry;
            }
        }
        winner.0
    }

    /// Describe each role that disagrees with the primary type.
    fn conflicts(
        &self,
        decided: &[Decided],
        primary_type: DecisionType,
        path: AggregationPath,
    ) -> Vec<String> {
        decided
            .iter()
            .filter_map(|(result, d)| {
                if d.decision_type == DecisionType::Abort && path != AggregationPath::AbortQuorum {
                    Some(format!(
                        "{}: ABORT dismissed without quorum (risk {}, confidence {:.2})",
                        result.role, d.risk_score, d.confidence
                    ))
                } else if d.decision_type != primary_type {
                    Some(format!(
                        "{}: recommends {} at risk {}",
                        result.role, d.decision_type, d.risk_score
                    ))
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate with a default [`Aggregator`].
pub fn aggregate(results: &[SpecialistResult]) -> Option<CompositeDecision> {
    Aggregator::new().aggregate(results)
}

fn qualifies_for_abort(d: &Decision) -> bool {
    d.decision_type == DecisionType::Abort
        && d.risk_score >= ABORT_MIN_RISK
        && d.confidence >= ABORT_MIN_CONFIDENCE
}

/// Type a decided entry votes with once the quorum has failed: a lone ABORT
/// counts as ESCALATE so it can never win by plurality.
fn voting_type(d: &Decision) -> DecisionType {
    match d.decision_type {
        DecisionType::Abort => DecisionType::Escalate,
        other => other,
    }
}

/// Decision whose risk is closest to `target`, earliest on ties.
fn closest_to<'a>(candidates: &[Decided<'a>], target: f64) -> &'a Decision {
    let mut best = candidates[0].1;
    let mut best_distance = (f64::from(best.risk_score) - target).abs();
    for (_, d) in &candidates[1..] {
        let distance = (f64::from(d.risk_score) - target).abs();
        if distance < best_distance {
            best = d;
            best_distance = distance;
        }
    }
    best
}

/// Median of risk scores; the mean of the two central values for even counts.
fn median(mut risks: Vec<u8>) -> f64 {
    risks.sort_unstable();
    let mid = risks.len() / 2;
    if risks.len() % 2 == 0 {
        (f64::from(risks[mid - 1]) + f64::from(risks[mid])) / 2.0
    } else {
        f64::from(risks[mid])
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn excerpt(message: &str) -> String {
    if message.chars().count() > FAULT_EXCERPT_CHARS {
        let head: String = message.chars().take(FAULT_EXCERPT_CHARS).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fault, Role, SpecialistOutcome};
    use proptest::prelude::*;

    fn decided(role: Role, t: DecisionType, risk: u8, confidence: f64) -> SpecialistResult {
        SpecialistResult::new(
            role,
            format!("{}-step", role),
            SpecialistOutcome::Decision(Decision {
                decision_type: t,
                recommended_action: format!("{} via {}", t, role),
                confidence,
                risk_score: risk,
                rationale_summary: vec![format!("{} view", role)],
                assumptions: vec![format!("{} assumption", role)],
            }),
        )
    }

    fn signaled(role: Role, delta: i8) -> SpecialistResult {
        SpecialistResult::new(
            role,
            "sig",
            SpecialistOutcome::Signal(Signal {
                summary_points: vec!["partial read".to_string()],
                confidence: 0.5,
                inferred_risk_delta: delta,
            }),
        )
    }

    fn faulted(role: Role, message: &str) -> SpecialistResult {
        SpecialistResult::new(role, "f", SpecialistOutcome::Fault(Fault::timeout(message)))
    }

    #[test]
    fn test_empty_input_is_not_aggregated() {
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn test_median_odd_count() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Modify, 2, 0.8),
            decided(Role::FeasibilityCapability, DecisionType::Modify, 9, 0.8),
            decided(Role::CostIncentive, DecisionType::Modify, 4, 0.8),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.calibrated_risk, 4.0);
        assert_eq!(composite.primary.risk_score, 4);
        assert_eq!(composite.path, AggregationPath::Standard);
        // Entry with risk 4 is closest to the median.
        assert_eq!(composite.primary.recommended_action, "MODIFY via cost_incentive");
    }

    #[test]
    fn test_median_even_count_uses_mean_of_middle() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Modify, 6, 0.8),
            decided(Role::FeasibilityCapability, DecisionType::Modify, 1, 0.8),
            decided(Role::CostIncentive, DecisionType::Modify, 3, 0.8),
            decided(Role::RiskStability, DecisionType::Modify, 10, 0.8),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.calibrated_risk, 4.5);
        assert_eq!(composite.primary.risk_score, 5);
    }

    #[test]
    fn test_single_abort_does_not_meet_quorum() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Abort, 9, 0.9),
            decided(Role::CostIncentive, DecisionType::Approve, 2, 0.8),
        ];
        let composite = aggregate(&results).unwrap();
        assert_ne!(composite.primary.decision_type, DecisionType::Abort);
        assert_eq!(composite.path, AggregationPath::Standard);
        assert_eq!(composite.calibrated_risk, 5.5);
        assert!(composite
            .conflicts
            .iter()
            .any(|c| c.contains("ABORT dismissed without quorum")));
    }

    #[test]
    fn test_abort_quorum_takes_max_risk() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Abort, 8, 0.7),
            decided(Role::FeasibilityCapability, DecisionType::Approve, 1, 0.9),
            decided(Role::CostIncentive, DecisionType::Abort, 10, 0.6),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.decision_type, DecisionType::Abort);
        assert_eq!(composite.primary.risk_score, 10);
        assert_eq!(composite.path, AggregationPath::AbortQuorum);
        assert!((composite.consensus_score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(composite.primary.recommended_action, "ABORT via cost_incentive");
    }

    #[test]
    fn test_low_confidence_aborts_do_not_qualify() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Abort, 9, 0.5),
            decided(Role::CostIncentive, DecisionType::Abort, 9, 0.59),
        ];
        let composite = aggregate(&results).unwrap();
        // Median 9 still forces REJECT, never ABORT.
        assert_eq!(composite.primary.decision_type, DecisionType::Reject);
    }

    #[test]
    fn test_high_median_rejects() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Approve, 7, 0.8),
            decided(Role::CostIncentive, DecisionType::Approve, 8, 0.8),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.decision_type, DecisionType::Reject);
        assert_eq!(composite.consensus_score, 0.0);
    }

    #[test]
    fn test_unanimous_approve() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Approve, 2, 0.6),
            decided(Role::CostIncentive, DecisionType::Approve, 3, 0.8),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.decision_type, DecisionType::Approve);
        assert_eq!(composite.consensus_score, 1.0);
        assert!((composite.primary.confidence - 0.7).abs() < 1e-9);
        assert!(composite.conflicts.is_empty());
    }

    #[test]
    fn test_majority_tie_breaks_by_first_occurrence() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Escalate, 3, 0.8),
            decided(Role::FeasibilityCapability, DecisionType::Modify, 3, 0.8),
            decided(Role::CostIncentive, DecisionType::Modify, 4, 0.8),
            decided(Role::RiskStability, DecisionType::Escalate, 5, 0.8),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.decision_type, DecisionType::Escalate);
        assert_eq!(composite.consensus_score, 0.5);
    }

    #[test]
    fn test_salvaged_path_without_baseline() {
        let results = vec![
            signaled(Role::RiskStability, 2),
            signaled(Role::CostIncentive, 1),
            faulted(Role::FeasibilityCapability, "timed out"),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.decision_type, DecisionType::Modify);
        assert_eq!(composite.primary.risk_score, 6);
        assert_eq!(composite.consensus_score, 0.4);
        assert!((composite.primary.confidence - 0.5).abs() < 1e-9);
        assert_eq!(composite.path, AggregationPath::Salvaged);
        assert_eq!(composite.inputs.len(), 3);
    }

    #[test]
    fn test_salvaged_risk_is_clamped() {
        let high = vec![
            decided(Role::RiskStability, DecisionType::Abort, 10, 0.9),
            signaled(Role::CostIncentive, 2),
        ];
        assert_eq!(aggregate(&high).unwrap().primary.risk_score, 7);

        let low = vec![
            decided(Role::RiskStability, DecisionType::Approve, 0, 0.9),
            signaled(Role::CostIncentive, -2),
        ];
        let composite = aggregate(&low).unwrap();
        assert_eq!(composite.primary.risk_score, 1);
        assert_eq!(composite.primary.rationale_summary[0], "Primary: APPROVE via risk_stability");
    }

    #[test]
    fn test_no_evidence_is_conservative_not_abort() {
        let long = "x".repeat(80);
        let results = vec![
            faulted(Role::RiskStability, &long),
            faulted(Role::FeasibilityCapability, "schema"),
            faulted(Role::CostIncentive, "rate limited"),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.decision_type, DecisionType::Modify);
        assert_eq!(composite.primary.risk_score, 0);
        assert_eq!(composite.primary.confidence, 0.0);
        assert_eq!(composite.consensus_score, 0.0);
        assert_eq!(composite.primary.rationale_summary.len(), 3);
        assert!(composite.primary.rationale_summary[0].ends_with("..."));
        assert_eq!(composite.path, AggregationPath::NoEvidence);
    }

    #[test]
    fn test_empty_rationale_does_not_panic() {
        let mut first = decided(Role::RiskStability, DecisionType::Modify, 4, 0.8);
        if let SpecialistOutcome::Decision(d) = &mut first.outcome {
            d.rationale_summary.clear();
        }
        let results = vec![first, decided(Role::CostIncentive, DecisionType::Modify, 4, 0.8)];
        let composite = aggregate(&results).unwrap();
        assert_eq!(composite.primary.rationale_summary[0], "risk_stability: risk 4: ");
    }

    #[test]
    fn test_fault_warning_is_appended_then_truncated() {
        let results = vec![
            decided(Role::RiskStability, DecisionType::Modify, 4, 0.8),
            decided(Role::CostIncentive, DecisionType::Modify, 4, 0.8),
            faulted(Role::FeasibilityCapability, "boom"),
        ];
        let composite = aggregate(&results).unwrap();
        assert_eq!(
            composite.primary.rationale_summary.last().unwrap(),
            "Warning: 1 specialist(s) faulted"
        );
    }

    fn decision_type_strategy() -> impl Strategy<Value = DecisionType> {
        prop_oneof![
            Just(DecisionType::Approve),
            Just(DecisionType::Reject),
            Just(DecisionType::Modify),
            Just(DecisionType::Escalate),
            Just(DecisionType::Abort),
        ]
    }

    fn outcome_strategy() -> impl Strategy<Value = SpecialistOutcome> {
        prop_oneof![
            (
                decision_type_strategy(),
                0u8..=10,
                0.0f64..=1.0,
                proptest::collection::vec("[a-z ]{0,10}", 0..=3)
            )
                .prop_map(|(t, risk, confidence, rationale)| {
                    SpecialistOutcome::Decision(Decision {
                        decision_type: t,
                        recommended_action: format!("act-{}", risk),
                        confidence,
                        risk_score: risk,
                        rationale_summary: rationale,
                        assumptions: vec![],
                    })
                }),
            (
                proptest::collection::vec("[a-z]{1,8}", 1..=3),
                0.0f64..=1.0,
                -2i8..=2
            )
                .prop_map(|(points, confidence, delta)| {
                    SpecialistOutcome::Signal(Signal {
                        summary_points: points,
                        confidence,
                        inferred_risk_delta: delta,
                    })
                }),
            "[a-z ]{0,70}".prop_map(|m| SpecialistOutcome::Fault(Fault::system(m))),
        ]
    }

    fn results_strategy() -> impl Strategy<Value = Vec<SpecialistResult>> {
        proptest::collection::vec((0usize..3, outcome_strategy()), 1..8).prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (role, outcome))| {
                    SpecialistResult::new(Role::ALL[role], format!("s{}", i), outcome)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_aggregation_is_deterministic(results in results_strategy()) {
            let first = serde_json::to_string(&aggregate(&results)).unwrap();
            let second = serde_json::to_string(&aggregate(&results)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_rationale_is_bounded(results in results_strategy()) {
            let composite = aggregate(&results).unwrap();
            prop_assert!(composite.primary.rationale_summary.len() <= MAX_RATIONALE_LINES);
            prop_assert!(composite.primary.risk_score <= 10);
            prop_assert_eq!(composite.inputs.len(), results.len());
        }

        #[test]
        fn prop_standard_risk_is_median(results in results_strategy()) {
            let mut risks: Vec<u8> = results
                .iter()
                .filter_map(|r| r.decision().map(|d| d.risk_score))
                .collect();
            let composite = aggregate(&results).unwrap();
            if risks.len() >= 2 && composite.path == AggregationPath::Standard {
                risks.sort_unstable();
                let n = risks.len();
                let expected = (f64::from(risks[(n - 1) / 2]) + f64::from(risks[n / 2])) / 2.0;
                prop_assert_eq!(composite.calibrated_risk, expected);
            }
        }

        #[test]
        fn prop_salvaged_risk_never_extreme(results in results_strategy()) {
            let composite = aggregate(&results).unwrap();
            if composite.path == AggregationPath::Salvaged {
                prop_assert!((1..=7).contains(&composite.primary.risk_score));
            }
        }
    }
}
