//! Resilience patterns for evaluator backends.
//!
//! This module provides:
//! - Per-role circuit breaker to stop hammering a dead backend
//! - An evaluator envelope adding timeouts and rate-limit backoff

mod circuit_breaker;
mod envelope;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use envelope::{EnvelopeConfig, EvaluatorEnvelope};
