//! JSON Schema validation for scenario files.
//!
//! The schema is embedded at compile time and compiled once on first use.

use std::sync::OnceLock;
use thiserror::Error;

const SCENARIO_SCHEMA_JSON: &str = include_str!("../../../../schemas/scenario.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(SCENARIO_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a scenario JSON value against the schema.
///
/// Returns every violation found, each suffixed with its instance path.
pub fn validate_scenario_schema(scenario_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(scenario_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "scenario_version": "1.0",
            "name": "Port access",
            "request": "Should the consortium reopen the northern port?",
            "plan": { "steps": [ { "id": "1", "role": "risk", "objective": "Assess" } ] },
            "specialists": {
                "risk": [ { "fault": { "kind": "TIMEOUT", "message": "slow" } } ]
            }
        })
    }

    #[test]
    fn test_minimal_scenario_passes() {
        assert!(validate_scenario_schema(&minimal()).is_ok());
    }

    #[test]
    fn test_missing_request_fails() {
        let mut value = minimal();
        value.as_object_mut().unwrap().remove("request");
        let errors = validate_scenario_schema(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("request")));
    }

    #[test]
    fn test_unknown_top_level_field_fails() {
        let mut value = minimal();
        value["extra"] = json!(true);
        assert!(validate_scenario_schema(&value).is_err());
    }

    #[test]
    fn test_bad_fault_kind_fails() {
        let mut value = minimal();
        value["specialists"]["risk"][0]["fault"]["kind"] = json!("EXPLODED");
        assert!(validate_scenario_schema(&value).is_err());
    }

    #[test]
    fn test_retry_bound_must_be_non_negative() {
        let mut value = minimal();
        value["options"] = json!({ "retry_bound": -1 });
        assert!(validate_scenario_schema(&value).is_err());
    }

    #[test]
    fn test_seed_must_be_non_negative() {
        let mut value = minimal();
        value["options"] = json!({ "seed": 42 });
        assert!(validate_scenario_schema(&value).is_ok());
        value["options"] = json!({ "seed": -3 });
        assert!(validate_scenario_schema(&value).is_err());
    }
}
