use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerStats, CircuitState};
use crate::error::{CircuitOpenError, GuardError};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker guarding a single protected operation.
///
/// All state lives behind one mutex; the lock is held only for counter and
/// state updates, never across a sleep or an await, so the same instance
/// serves blocking and async callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state
    state: Mutex<State>,
    /// Logical operation name
    name: String,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Classified failures in the current closed period
    failure_count: u32,
    /// Probe successes in the current half-open period
    success_count: u32,
    /// Number of half-open probes currently in flight
    half_open_in_flight: u32,
    /// When the most recent classified failure was recorded
    last_failure_time: Option<Instant>,
    /// When the breaker last changed state
    last_state_change: Instant,
    /// Cumulative counters
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            name = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            half_open_max_calls = config.half_open_max_calls,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: Mutex::new(State {
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
                metrics: CircuitBreakerMetrics::default(),
            }),
            name,
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to run one attempt.
    ///
    /// Re-evaluates an open circuit lazily: once `recovery_timeout` has
    /// elapsed the breaker moves to half-open and the attempt becomes the
    /// probe. Rejections never invoke the protected operation.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.lock();
        self.maybe_half_open(&mut state);

        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_calls += 1;
                Ok(())
            }
            CircuitState::Open => {
                state.metrics.rejected_calls += 1;
                debug!(
                    name = %self.name,
                    elapsed = ?state.last_state_change.elapsed(),
                    recovery_timeout = ?self.config.recovery_timeout(),
                    "Circuit open, rejecting call"
                );
                Err(self.open_error(&state))
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight < self.config.half_open_max_calls {
                    state.metrics.total_calls += 1;
                    state.half_open_in_flight += 1;
                    debug!(
                        name = %self.name,
                        in_flight = state.half_open_in_flight,
                        max = self.config.half_open_max_calls,
                        "Allowing half-open probe call"
                    );
                    Ok(())
                } else {
                    state.metrics.rejected_calls += 1;
                    debug!(name = %self.name, "Max half-open probes in flight, rejecting");
                    Err(self.open_error(&state))
                }
            }
        }
    }

    /// Record a successful attempt
    pub fn on_success(&self) {
        let mut state = self.lock();
        state.metrics.successful_calls += 1;

        match state.circuit_state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                state.success_count += 1;
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);

                debug!(
                    name = %self.name,
                    success_count = state.success_count,
                    threshold = self.config.success_threshold,
                    "Half-open probe succeeded"
                );

                if state.success_count >= self.config.success_threshold {
                    self.transition_to_closed(&mut state);
                }
            }
            CircuitState::Open => {
                warn!(name = %self.name, "Recording success in open state");
            }
        }
    }

    /// Record a failed attempt.
    ///
    /// Only classified failures move the state machine; an unclassified
    /// failure propagates to the caller without touching the thresholds.
    pub fn on_failure(&self, classified: bool) {
        let mut state = self.lock();
        state.metrics.failed_calls += 1;
        if classified {
            state.last_failure_time = Some(Instant::now());
        }

        match state.circuit_state {
            CircuitState::Closed => {
                if !classified {
                    return;
                }
                state.failure_count += 1;

                debug!(
                    name = %self.name,
                    failure_count = state.failure_count,
                    threshold = self.config.failure_threshold,
                    "Classified failure in closed state"
                );

                if state.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                if classified {
                    warn!(name = %self.name, "Half-open probe failed, reopening circuit");
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::Open => {
                debug!(name = %self.name, "Recording failure in open state");
            }
        }
    }

    /// Record an attempt that hit its deadline; timeouts always count as
    /// classified failures.
    pub fn on_timeout(&self) {
        {
            let mut state = self.lock();
            state.metrics.timeout_count += 1;
        }
        self.on_failure(true);
    }

    /// Run one async operation through the breaker, counting every error
    /// as a classified failure. Use a [`Guard`](crate::guard::Guard) to
    /// classify failures selectively.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(true);
                Err(GuardError::Inner(e))
            }
        }
    }

    /// Blocking counterpart of [`call`](Self::call).
    pub fn call_blocking<T, E, F>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.try_acquire()?;
        match op() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure(true);
                Err(GuardError::Inner(e))
            }
        }
    }

    /// Current state, after the lazy open-to-half-open check
    pub fn state(&self) -> CircuitState {
        let mut state = self.lock();
        self.maybe_half_open(&mut state);
        state.circuit_state
    }

    /// Snapshot of state, counters, and configuration.
    ///
    /// Reading stats never changes the counters; the only side effect is
    /// the same lazy open-to-half-open transition every read performs.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut state = self.lock();
        self.maybe_half_open(&mut state);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.circuit_state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
            last_state_change: state.last_state_change,
            config: self.config.clone(),
            metrics: state.metrics.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_error(&self, state: &State) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            state: state.circuit_state,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Lazy open-to-half-open transition, checked on every read
    fn maybe_half_open(&self, state: &mut State) {
        if state.circuit_state == CircuitState::Open
            && state.last_state_change.elapsed() >= self.config.recovery_timeout()
        {
            self.transition_to_half_open(state);
        }
    }

    /// Transition to open state
    fn transition_to_open(&self, state: &mut State) {
        info!(
            name = %self.name,
            failure_count = state.failure_count,
            "Circuit breaker opening"
        );

        state.circuit_state = CircuitState::Open;
        state.last_state_change = Instant::now();
        if state.last_failure_time.is_none() {
            state.last_failure_time = Some(state.last_state_change);
        }
        state.half_open_in_flight = 0;
        state.metrics.circuit_opened_count += 1;
    }

    /// Transition to half-open state; only the success counter resets here
    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            name = %self.name,
            recovery_timeout = ?self.config.recovery_timeout(),
            "Circuit breaker transitioning to half-open"
        );

        state.circuit_state = CircuitState::HalfOpen;
        state.success_count = 0;
        state.half_open_in_flight = 0;
        state.last_state_change = Instant::now();
        state.metrics.circuit_half_opened_count += 1;
    }

    /// Transition to closed state
    fn transition_to_closed(&self, state: &mut State) {
        info!(
            name = %self.name,
            success_count = state.success_count,
            "Circuit breaker closing"
        );

        state.circuit_state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.half_open_in_flight = 0;
        state.last_state_change = Instant::now();
        state.metrics.circuit_closed_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test-op".to_string(), config)
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(cb.try_acquire().is_ok());
            cb.on_failure(true);
        }

        assert_eq!(cb.state(), CircuitState::Open);
        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.state, CircuitState::Open);
        assert!(err.last_failure_time.is_some());
    }

    #[test]
    fn test_unclassified_failures_do_not_open() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        for _ in 0..5 {
            assert!(cb.try_acquire().is_ok());
            cb.on_failure(false);
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
        assert_eq!(cb.stats().metrics.failed_calls, 5);
    }

    #[test]
    fn test_success_in_closed_does_not_reset_count() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        assert!(cb.try_acquire().is_ok());
        cb.on_failure(true);
        assert!(cb.try_acquire().is_ok());
        cb.on_failure(true);

        assert!(cb.try_acquire().is_ok());
        cb.on_success();
        assert_eq!(cb.stats().failure_count, 2);

        assert!(cb.try_acquire().is_ok());
        cb.on_failure(true);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_caps_concurrent_probes() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            half_open_max_calls: 2,
            recovery_timeout_ms: 0,
            ..Default::default()
        });

        for _ in 0..2 {
            assert!(cb.try_acquire().is_ok());
            cb.on_failure(true);
        }

        // recovery_timeout is zero, so the next acquire is a probe
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_ok());

        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.state, CircuitState::HalfOpen);

        // A finished probe releases its slot
        cb.on_success();
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            half_open_max_calls: 3,
            recovery_timeout_ms: 0,
            ..Default::default()
        });

        for _ in 0..2 {
            assert!(cb.try_acquire().is_ok());
            cb.on_failure(true);
        }

        assert!(cb.try_acquire().is_ok());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.try_acquire().is_ok());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 0);
        assert_eq!(cb.stats().success_count, 0);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout_ms: 0,
            ..Default::default()
        });

        for _ in 0..2 {
            assert!(cb.try_acquire().is_ok());
            cb.on_failure(true);
        }
        let opened_at = cb.stats().last_state_change;

        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.on_failure(true);
        let stats = cb.stats();
        // recovery_timeout is zero so the read above has already half-opened
        // again, but the state-change timestamp must have been refreshed.
        assert!(stats.last_state_change > opened_at);
        assert_eq!(stats.metrics.circuit_opened_count, 2);
    }

    #[test]
    fn test_open_rejects_until_recovery_timeout() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            recovery_timeout_ms: 100,
            ..Default::default()
        });

        assert!(cb.try_acquire().is_ok());
        cb.on_failure(true);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(50));
        assert!(cb.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(100));
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stats_read_is_idempotent() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        assert!(cb.try_acquire().is_ok());
        cb.on_failure(true);

        let first = cb.stats();
        for _ in 0..10 {
            let again = cb.stats();
            assert_eq!(again.failure_count, first.failure_count);
            assert_eq!(again.success_count, first.success_count);
            assert_eq!(again.metrics.total_calls, first.metrics.total_calls);
        }
    }

    #[tokio::test]
    async fn test_call_records_outcomes() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        let ok: Result<_, GuardError<&str>> = cb.call(|| async { Ok::<_, &str>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..2 {
            let err = cb.call(|| async { Err::<(), _>("boom") }).await.unwrap_err();
            assert_eq!(err.into_inner(), Some("boom"));
        }

        let short_circuit = cb.call(|| async { Ok::<_, &str>(7) }).await.unwrap_err();
        assert!(short_circuit.is_circuit_open());
    }

    #[test]
    fn test_call_blocking_records_outcomes() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let ok: Result<_, GuardError<&str>> = cb.call_blocking(|| Ok::<_, &str>("fine"));
        assert_eq!(ok.unwrap(), "fine");

        let err = cb.call_blocking(|| Err::<(), _>("boom")).unwrap_err();
        assert_eq!(err.into_inner(), Some("boom"));
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
