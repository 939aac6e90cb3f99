//! Runtime configuration.
//!
//! Every field has a default; a file only names what it changes. Durations
//! are written in human form (`"30s"`, `"2m"`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use concord_core::ScenarioOptions;

use crate::cache::CacheConfig;
use crate::resilience::EnvelopeConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Options for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Judgment rejections that may be retried before the run is REJECTED
    pub retry_bound: u32,

    /// Maximum resolution steps
    pub resolution_steps: u32,

    /// Soft deadline for the whole run
    #[serde(with = "concord_core::duration::option")]
    pub deadline: Option<Duration>,

    /// Seed recorded in the final report for replay
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            retry_bound: 2,
            resolution_steps: 3,
            deadline: None,
            seed: None,
        }
    }
}

impl RunOptions {
    /// Apply the options a scenario pins over these.
    pub fn overridden_by(&self, scenario: &ScenarioOptions) -> Self {
        Self {
            retry_bound: scenario.retry_bound.unwrap_or(self.retry_bound),
            resolution_steps: scenario.resolution_steps.unwrap_or(self.resolution_steps),
            deadline: scenario.deadline.or(self.deadline),
            seed: scenario.seed.or(self.seed),
        }
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub run: RunOptions,

    pub evaluator: EnvelopeConfig,

    pub cache: CacheConfig,

    /// Directory final reports are archived to
    pub archive_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
