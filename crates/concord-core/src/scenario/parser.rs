//! Scenario parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::schema::validate_scenario_schema;
use crate::types::{ConstraintResult, Context, Fault, JudgmentResult, PlanDraft, Role, UnknownRole};
use crate::validation::ValidationError;

/// Errors that can occur when loading a scenario.
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Failed to read scenario file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaViolations(Vec<String>),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown specialist key: {0}")]
    UnknownRole(#[from] UnknownRole),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[source] ValidationError),

    #[error("Scenario validation failed: {0}")]
    ValidationError(String),
}

/// One scripted evaluator reply: a raw reply or a transport fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedReply {
    /// Raw reply, interpreted exactly like a live evaluator's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,

    /// Artificial latency before the reply is delivered.
    #[serde(default, with = "crate::duration::option", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
}

/// A scripted collaborator answer: a value, or a collaborator failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scripted<T> {
    Failure { error: String },
    Value(T),
}

/// Scripted resolution-phase behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionScript {
    /// Raw step replies, interpreted like a live proposer's output.
    #[serde(default)]
    pub steps: Vec<Value>,

    #[serde(default = "default_stability")]
    pub stability_score: f64,
}

fn default_stability() -> f64 {
    1.0
}

impl Default for ResolutionScript {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            stability_score: default_stability(),
        }
    }
}

/// Run options a scenario may pin; unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOptions {
    #[serde(default)]
    pub retry_bound: Option<u32>,

    #[serde(default)]
    pub resolution_steps: Option<u32>,

    #[serde(default, with = "crate::duration::option")]
    pub deadline: Option<Duration>,

    /// Seed recorded in the report so a run can be replayed
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A replayable scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario_version: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// The request handed to the planner.
    pub request: String,

    #[serde(default)]
    pub context: Context,

    #[serde(default)]
    pub plan: PlanDraft,

    /// When set, planning fails with this message.
    #[serde(default)]
    pub plan_error: Option<String>,

    /// Reply sequences keyed by role name (aliases accepted).
    pub specialists: BTreeMap<String, Vec<ScriptedReply>>,

    /// Constraint check answers; an empty sequence always reports safe.
    #[serde(default)]
    pub constraint: Vec<Scripted<ConstraintResult>>,

    /// Judgment answers; an empty sequence approves the composite as is.
    #[serde(default)]
    pub judgment: Vec<Scripted<JudgmentResult>>,

    #[serde(default)]
    pub resolution: ResolutionScript,

    #[serde(default)]
    pub options: ScenarioOptions,
}

impl Scenario {
    /// Parse a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScenarioError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a scenario from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load a scenario file, choosing the format by extension.
    ///
    /// Anything that is not `.json` is read as YAML, which also accepts JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    fn from_value(value: Value) -> Result<Self, ScenarioError> {
        validate_scenario_schema(&value).map_err(ScenarioError::SchemaViolations)?;
        let scenario: Scenario = serde_json::from_value(value)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::MissingField("name".to_string()));
        }
        if self.request.trim().is_empty() {
            return Err(ScenarioError::MissingField("request".to_string()));
        }

        let scripts = self.specialist_scripts()?;

        if self.plan_error.is_none() {
            self.plan
                .resolve(|role| scripts.contains_key(&role))
                .map_err(ScenarioError::InvalidPlan)?;
        }

        Ok(())
    }

    /// Specialist scripts keyed by resolved role.
    pub fn specialist_scripts(&self) -> Result<BTreeMap<Role, Vec<ScriptedReply>>, ScenarioError> {
        let mut scripts = BTreeMap::new();

        for (key, replies) in &self.specialists {
            let role: Role = key.parse()?;

            if replies.is_empty() {
                return Err(ScenarioError::ValidationError(format!(
                    "specialist script for {} is empty",
                    role
                )));
            }
            for (i, entry) in replies.iter().enumerate() {
                if entry.reply.is_some() == entry.fault.is_some() {
                    return Err(ScenarioError::ValidationError(format!(
                        "specialists.{}[{}] must set exactly one of reply or fault",
                        key, i
                    )));
                }
            }

            if scripts.insert(role, replies.clone()).is_some() {
                return Err(ScenarioError::ValidationError(format!(
                    "role {} is scripted more than once",
                    role
                )));
            }
        }

        Ok(scripts)
    }
}
