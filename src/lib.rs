//! Resilience control layer for unreliable outbound calls.
//!
//! Wraps a fallible operation (a remote model or API provider, typically)
//! with failure isolation, bounded retry, and timeout enforcement:
//!
//! - [`breaker::CircuitBreaker`] — per-endpoint Closed/Open/HalfOpen state
//!   machine that short-circuits calls to a failing operation;
//! - [`breaker::BreakerRegistry`] — explicit name-to-breaker directory with
//!   first-registration-wins semantics;
//! - [`retry::RetryExecutor`] — bounded retry with pluggable
//!   [`backoff`] strategies and jitter;
//! - [`timeout`] — per-attempt deadlines for async and blocking callers;
//! - [`guard::Guard`] — the composition of all of the above plus an
//!   optional fallback, with async and blocking entry points.
//!
//! ```no_run
//! use resilience::{BreakerRegistry, CircuitBreakerConfig, Guard, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let registry = BreakerRegistry::new();
//! let guard: Guard<String, std::io::Error> = registry
//!     .wrap("completion-api", CircuitBreakerConfig::default())
//!     .retry_config(RetryConfig::default())
//!     .timeout(Duration::from_secs(30))
//!     .fallback(|| "service degraded".to_string())
//!     .build();
//!
//! let reply = guard.call(|| async { Ok("hello".to_string()) }).await;
//! # let _ = reply;
//! # }
//! ```

pub mod backoff;
pub mod breaker;
pub mod error;
pub mod guard;
pub mod retry;
pub mod timeout;

pub use backoff::BackoffStrategy;
pub use breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitBreakerStats, CircuitState,
};
pub use error::{CircuitOpenError, GuardError};
pub use guard::{Guard, GuardBuilder};
pub use retry::{RetryConfig, RetryExecutor, RetryPolicy};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
