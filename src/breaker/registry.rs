use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::guard::GuardBuilder;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Process-wide directory of circuit breakers, keyed by logical name.
///
/// Constructed once at startup and passed by reference into call sites;
/// there is no hidden global. The first registration for a name wins and
/// the breaker lives until the registry is dropped.
#[derive(Debug, Clone, Default)]
pub struct BreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Get the breaker registered under `name`, creating it with `config`
    /// if absent. Re-registration returns the existing breaker unchanged;
    /// the new configuration is ignored.
    pub fn register(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(name = name, "Registering circuit breaker");
                Arc::new(CircuitBreaker::new(name.to_string(), config))
            })
            .clone()
    }

    /// Look up a breaker without creating it
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Start building a guarded operation bound to `name`.
    ///
    /// Idempotent per name: the underlying breaker is shared with every
    /// other guard built under the same name.
    pub fn wrap<T, E>(&self, name: &str, config: CircuitBreakerConfig) -> GuardBuilder<T, E> {
        GuardBuilder::new(self.register(name, config))
    }

    /// Current state for a name; closed if nothing is registered
    pub fn state(&self, name: &str) -> CircuitState {
        match self.get(name) {
            Some(breaker) => breaker.state(),
            None => CircuitState::Closed,
        }
    }

    /// Stats snapshot for one name
    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.get(name).map(|breaker| breaker.stats())
    }

    /// Registered names
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Stats for every registered breaker, for a monitoring endpoint
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| entry.value().stats())
            .collect()
    }
}
