use crate::backoff::{compute_delay, BackoffStrategy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (minimum 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How the delay grows per attempt
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,

    /// Upper bound on the jitter subtracted from each delay, in milliseconds
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_max_jitter_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: default_strategy(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    /// Attempt count, clamped so there is always a first attempt
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Retry configuration plus the predicates that drive it.
///
/// `retry_on_failure` decides whether a failed attempt is worth repeating;
/// `retry_on_result` optionally flags a successful but degraded result for
/// another attempt; `on_retry` is a side-effect-only observer invoked with
/// the attempt number and the failure before each backoff sleep.
pub struct RetryPolicy<T, E> {
    config: RetryConfig,
    retry_on_failure: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    retry_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    on_retry: Option<Arc<dyn Fn(u32, &E) + Send + Sync>>,
}

impl<T, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retry_on_failure: self.retry_on_failure.clone(),
            retry_on_result: self.retry_on_result.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("retry_on_result", &self.retry_on_result.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<T, E> RetryPolicy<T, E> {
    /// Policy that retries every failure under the given config
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retry_on_failure: Arc::new(|_| true),
            retry_on_result: None,
            on_retry: None,
        }
    }

    pub fn retry_on_failure(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_on_failure = Arc::new(pred);
        self
    }

    pub fn retry_on_result(mut self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.retry_on_result = Some(Arc::new(pred));
        self
    }

    pub fn on_retry(mut self, observer: impl Fn(u32, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub(crate) fn should_retry(&self, failure: &E) -> bool {
        (self.retry_on_failure)(failure)
    }

    pub(crate) fn failure_predicate(&self) -> Arc<dyn Fn(&E) -> bool + Send + Sync> {
        self.retry_on_failure.clone()
    }

    pub(crate) fn result_needs_retry(&self, value: &T) -> bool {
        self.retry_on_result
            .as_ref()
            .map(|pred| pred(value))
            .unwrap_or(false)
    }

    pub(crate) fn notify_retry(&self, attempt: u32, failure: &E) {
        if let Some(observer) = &self.on_retry {
            observer(attempt, failure);
        }
    }

    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        compute_delay(
            self.config.strategy,
            attempt,
            self.config.base_delay(),
            self.config.max_delay(),
            self.config.max_jitter(),
            &mut rand::thread_rng(),
        )
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Drives repeated invocation of an operation under a [`RetryPolicy`].
///
/// Knows nothing about circuit breakers; composition with a breaker happens
/// in [`Guard`](crate::guard::Guard).
#[derive(Debug, Clone)]
pub struct RetryExecutor<T, E> {
    policy: RetryPolicy<T, E>,
}

impl<T, E> RetryExecutor<T, E>
where
    E: std::fmt::Display,
{
    /// Create a new retry executor
    pub fn new(policy: RetryPolicy<T, E>) -> Self {
        Self { policy }
    }

    /// Execute an async operation with retries.
    ///
    /// The final attempt's failure is returned exactly as the operation
    /// raised it; a successful result flagged by `retry_on_result` gets the
    /// same backoff as a failure before the next attempt.
    pub async fn execute<F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.config.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Executing attempt");

            match op().await {
                Ok(value) => {
                    if attempt < max_attempts && self.policy.result_needs_retry(&value) {
                        let delay = self.policy.delay_for(attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Result flagged for retry, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if attempt > 1 {
                        debug!(attempt, "Attempt succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(attempt, max_attempts, error = %e, "Retries exhausted");
                        return Err(e);
                    }
                    if !self.policy.should_retry(&e) {
                        debug!(attempt, error = %e, "Failure not retryable");
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt);
                    self.policy.notify_retry(attempt, &e);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Blocking counterpart of [`execute`](Self::execute); suspends the
    /// calling thread between attempts.
    pub fn execute_blocking<F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let max_attempts = self.policy.config.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Executing attempt");

            match op() {
                Ok(value) => {
                    if attempt < max_attempts && self.policy.result_needs_retry(&value) {
                        let delay = self.policy.delay_for(attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Result flagged for retry, backing off"
                        );
                        std::thread::sleep(delay);
                        continue;
                    }
                    if attempt > 1 {
                        debug!(attempt, "Attempt succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(attempt, max_attempts, error = %e, "Retries exhausted");
                        return Err(e);
                    }
                    if !self.policy.should_retry(&e) {
                        debug!(attempt, error = %e, "Failure not retryable");
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt);
                    self.policy.notify_retry(attempt, &e);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying after backoff"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
