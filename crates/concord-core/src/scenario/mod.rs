//! Scenario files.
//!
//! A scenario declares a request, its context, a plan, and scripted replies
//! for every collaborator so a run can be replayed offline. Scenarios are
//! YAML or JSON, validated against `schemas/scenario.schema.json` and then
//! semantically.

mod parser;
mod schema;

pub use parser::{
    ResolutionScript, Scenario, ScenarioError, ScenarioOptions, Scripted, ScriptedReply,
};
pub use schema::validate_scenario_schema;
