//! Reply cache for evaluators.
//!
//! Memoizes usable evaluator replies so identical requests within the TTL
//! are answered without another backend call. Faults are never cached, and
//! neither are replies that would classify as one: a malformed reply is
//! retried on the next request instead of being served until it expires.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use concord_core::{classify, Context, Fault, Role, SpecialistOutcome};

use crate::collaborators::Evaluator;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    pub max_entries: u64,

    #[serde(with = "concord_core::duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Cache key for evaluator replies.
#[derive(Clone, Debug)]
pub struct CacheKey {
    role: Role,
    instruction_hash: u64,
    context_hash: u64,
}

impl CacheKey {
    pub fn new(role: Role, instruction: &str, context: &Context) -> Self {
        Self {
            role,
            instruction_hash: hash_instruction(instruction),
            context_hash: hash_context(context),
        }
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.role.hash(state);
        self.instruction_hash.hash(state);
        self.context_hash.hash(state);
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role
            && self.instruction_hash == other.instruction_hash
            && self.context_hash == other.context_hash
    }
}

impl Eq for CacheKey {}

/// An [`Evaluator`] that answers repeated requests from memory.
pub struct CachingEvaluator {
    inner: Arc<dyn Evaluator>,
    cache: Cache<CacheKey, Value>,
}

impl CachingEvaluator {
    pub fn new(inner: Arc<dyn Evaluator>, config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self { inner, cache }
    }
}

#[async_trait]
impl Evaluator for CachingEvaluator {
    async fn evaluate(&self, role: Role, instruction: &str, context: &Context) -> Result<Value, Fault> {
        let key = CacheKey::new(role, instruction, context);
        if let Some(reply) = self.cache.get(&key).await {
            tracing::debug!(role = %role, "Evaluator cache hit");
            return Ok(reply);
        }

        let reply = self.inner.evaluate(role, instruction, context).await?;
        if let SpecialistOutcome::Fault(fault) = classify(reply.clone()) {
            tracing::debug!(role = %role, error = %fault.message, "Unusable reply not cached");
        } else {
            self.cache.insert(key, reply.clone()).await;
        }
        Ok(reply)
    }
}

fn hash_instruction(instruction: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    instruction.hash(&mut hasher);
    hasher.finish()
}

fn hash_context(context: &Context) -> u64 {
    let mut hasher = DefaultHasher::new();
    // BTreeMap iteration is ordered, so equal contexts hash equally.
    for (key, value) in context {
        key.hash(&mut hasher);
        value.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Plays back scripted replies, then answers with a well-formed decision.
    struct Counting {
        calls: Mutex<u32>,
        script: Mutex<VecDeque<Result<Value, Fault>>>,
    }

    #[async_trait]
    impl Evaluator for Counting {
        async fn evaluate(&self, role: Role, _: &str, _: &Context) -> Result<Value, Fault> {
            *self.calls.lock() += 1;
            self.script.lock().pop_front().unwrap_or_else(|| {
                Ok(json!({
                    "decision_type": "APPROVE",
                    "recommended_action": format!("Proceed ({})", role.as_str()),
                    "confidence": 0.8,
                    "risk_score": 3
                }))
            })
        }
    }

    fn counting(script: Vec<Result<Value, Fault>>) -> Arc<Counting> {
        Arc::new(Counting {
            calls: Mutex::new(0),
            script: Mutex::new(script.into()),
        })
    }

    #[tokio::test]
    async fn test_repeated_request_hits_cache() {
        let inner = counting(vec![]);
        let cache = CachingEvaluator::new(inner.clone(), &CacheConfig::default());
        let mut ctx = Context::new();
        ctx.insert("region".to_string(), json!("north"));

        let first = cache.evaluate(Role::RiskStability, "assess", &ctx).await.unwrap();
        let second = cache.evaluate(Role::RiskStability, "assess", &ctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(*inner.calls.lock(), 1);

        // Different role, instruction or context is a different entry.
        cache.evaluate(Role::CostIncentive, "assess", &ctx).await.unwrap();
        cache.evaluate(Role::RiskStability, "reassess", &ctx).await.unwrap();
        cache.evaluate(Role::RiskStability, "assess", &Context::new()).await.unwrap();
        assert_eq!(*inner.calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_faults_are_not_cached() {
        let inner = counting(vec![Err(Fault::timeout("slow")), Err(Fault::timeout("slow"))]);
        let cache = CachingEvaluator::new(inner.clone(), &CacheConfig::default());
        let ctx = Context::new();
        assert!(cache.evaluate(Role::RiskStability, "assess", &ctx).await.is_err());
        assert!(cache.evaluate(Role::RiskStability, "assess", &ctx).await.is_err());
        assert_eq!(*inner.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_not_cached() {
        let inner = counting(vec![Ok(json!("I would lean towards approving this."))]);
        let cache = CachingEvaluator::new(inner.clone(), &CacheConfig::default());
        let ctx = Context::new();

        let first = cache.evaluate(Role::RiskStability, "assess", &ctx).await.unwrap();
        assert!(matches!(classify(first), SpecialistOutcome::Fault(_)));

        let second = cache.evaluate(Role::RiskStability, "assess", &ctx).await.unwrap();
        assert!(matches!(classify(second), SpecialistOutcome::Decision(_)));
        assert_eq!(*inner.calls.lock(), 2);

        // The good reply is now the cached one.
        cache.evaluate(Role::RiskStability, "assess", &ctx).await.unwrap();
        assert_eq!(*inner.calls.lock(), 2);
    }
}
