//! Per-role circuit breaker.
//!
//! When one specialist's backend keeps failing, its circuit opens and calls
//! for that role fault immediately instead of waiting on a dead backend.
//! Other roles are unaffected.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use concord_core::Role;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Time an open circuit waits before letting a probe through
    #[serde(with = "concord_core::duration")]
    pub recovery_timeout: Duration,

    /// Probe successes needed to close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

pub struct CircuitBreaker {
    states: RwLock<HashMap<Role, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls for `role` must be refused right now.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and lets the call through as a probe.
    pub fn is_open(&self, role: Role) -> bool {
        let mut states = self.states.write();
        match states.get(&role) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    states.insert(role, CircuitState::HalfOpen { successes: 0 });
                    tracing::info!(role = %role, "Circuit half-open, probing backend");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, role: Role) {
        let mut states = self.states.write();
        match states.get(&role).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(role, CircuitState::Closed { failures: 0 });
                    tracing::info!(role = %role, "Circuit closed after recovery");
                } else {
                    states.insert(
                        role,
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { .. }) => {
                states.insert(role, CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, role: Role) {
        let mut states = self.states.write();
        let failures = match states.get(&role).cloned() {
            None => 1,
            Some(CircuitState::Closed { failures }) => failures + 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(role, CircuitState::Open { opened_at: Instant::now() });
                tracing::warn!(role = %role, "Circuit reopened after failed probe");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(role, CircuitState::Open { opened_at: Instant::now() });
            tracing::warn!(role = %role, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(role, CircuitState::Closed { failures });
        }
    }

    pub fn state(&self, role: Role) -> CircuitState {
        self.states
            .read()
            .get(&role)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
