//! Interpretation of raw collaborator replies.
//!
//! Evaluators and step proposers hand back raw JSON, often produced by a
//! language model. A reply is accepted as a [`Decision`] only if it both
//! deserializes and validates. Failing that, a reply shaped like a
//! [`Signal`] is kept as degraded intelligence. Anything else becomes a
//! `SCHEMA_ERROR` fault; nothing is patched up or guessed.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::{Decision, Fault, Role, Signal, SpecialistOutcome, SpecialistResult, StepProposal};
use crate::validation::Validate;

lazy_static! {
    /// A reply wrapped in a markdown code fence, with an optional language tag.
    static ref FENCED_REPLY: Regex = Regex::new(
        r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(?P<body>.*?)\s*```\s*$"
    ).unwrap();
}

/// Turn a text reply into JSON, unwrapping a code fence if present.
fn unwrap_text(text: &str) -> Result<Value, String> {
    let body = FENCED_REPLY
        .captures(text)
        .and_then(|caps| caps.name("body"))
        .map(|m| m.as_str())
        .unwrap_or(text);

    serde_json::from_str(body.trim()).map_err(|e| format!("reply is not JSON: {}", e))
}

/// Normalize a reply: JSON strings are parsed, everything else is taken as is.
fn normalize(reply: Value) -> Result<Value, String> {
    match reply {
        Value::String(text) => unwrap_text(&text),
        other => Ok(other),
    }
}

fn parse_valid<T: DeserializeOwned + Validate>(value: &Value) -> Result<T, String> {
    let parsed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    parsed.validate().map_err(|e| e.to_string())?;
    Ok(parsed)
}

/// Interpret an evaluator reply for one role.
///
/// Transport faults reported by the evaluator pass through unchanged.
pub fn interpret_reply(
    role: Role,
    step_id: &str,
    reply: Result<Value, Fault>,
) -> SpecialistResult {
    let outcome = match reply {
        Err(fault) => SpecialistOutcome::Fault(fault),
        Ok(raw) => classify(raw),
    };
    SpecialistResult::new(role, step_id, outcome)
}

/// Classify a raw, successfully delivered reply.
pub fn classify(raw: Value) -> SpecialistOutcome {
    let value = match normalize(raw) {
        Ok(value) => value,
        Err(message) => return SpecialistOutcome::Fault(Fault::schema(message)),
    };

    let decision_error = match parse_valid::<Decision>(&value) {
        Ok(decision) => return SpecialistOutcome::Decision(decision),
        Err(e) => e,
    };

    match parse_valid::<Signal>(&value) {
        Ok(signal) => {
            tracing::debug!(error = %decision_error, "Reply salvaged as signal");
            SpecialistOutcome::Signal(signal)
        }
        Err(_) => SpecialistOutcome::Fault(Fault::schema(format!(
            "invalid decision: {}",
            decision_error
        ))),
    }
}

/// Re-check a result that arrived already typed, e.g. read back from disk.
///
/// A decision or signal that fails validation becomes a `SCHEMA_ERROR`
/// fault, the same outcome a live reply with those values would get.
pub fn screen_result(result: SpecialistResult) -> SpecialistResult {
    let invalid = match &result.outcome {
        SpecialistOutcome::Decision(decision) => decision
            .validate()
            .err()
            .map(|e| format!("invalid decision: {}", e)),
        SpecialistOutcome::Signal(signal) => signal
            .validate()
            .err()
            .map(|e| format!("invalid signal: {}", e)),
        SpecialistOutcome::Fault(_) => None,
    };
    match invalid {
        Some(message) => SpecialistResult::new(
            result.role,
            result.step_id,
            SpecialistOutcome::Fault(Fault::schema(message)),
        ),
        None => result,
    }
}

/// Parse one resolution step reply into the expected proposal shape.
pub fn interpret_step(raw: Value) -> Result<StepProposal, String> {
    let value = normalize(raw)?;
    parse_valid::<StepProposal>(&value)
}
