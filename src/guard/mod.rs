//! The wrapping combinator: timeout guard, retry executor, circuit breaker
//! and optional fallback composed into one callable with the protected
//! operation's own signature.

use crate::breaker::CircuitBreaker;
use crate::error::GuardError;
use crate::retry::{RetryConfig, RetryExecutor, RetryPolicy};
use crate::timeout;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type Fallback<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Builder for a [`Guard`]. Obtained from
/// [`BreakerRegistry::wrap`](crate::breaker::BreakerRegistry::wrap) or
/// constructed around an explicit breaker.
pub struct GuardBuilder<T, E> {
    breaker: Arc<CircuitBreaker>,
    retry: Option<RetryPolicy<T, GuardError<E>>>,
    timeout: Option<Duration>,
    classify: Classifier<E>,
    fallback: Option<Fallback<T>>,
}

impl<T, E> GuardBuilder<T, E> {
    /// Build a guard around an existing breaker
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            retry: None,
            timeout: None,
            classify: Arc::new(|_| true),
            fallback: None,
        }
    }

    /// Retry attempts under the given policy. Without this the guard makes
    /// a single attempt per call.
    pub fn retry(mut self, policy: RetryPolicy<T, GuardError<E>>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Retry with the given config and default predicates
    pub fn retry_config(self, config: RetryConfig) -> Self {
        self.retry(RetryPolicy::new(config))
    }

    /// Bound each individual attempt to `duration`
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Decide which operation errors count toward the breaker's failure
    /// threshold. Unclassified errors still propagate (and may be retried)
    /// but never move the breaker's state machine. Defaults to classifying
    /// every error.
    pub fn classify(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.classify = Arc::new(pred);
        self
    }

    /// Substitute result when the breaker short-circuits. Absorbs
    /// `CircuitOpen` failures only; real operation failures always
    /// propagate.
    pub fn fallback(mut self, f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Guard<T, E> {
        Guard {
            breaker: self.breaker,
            retry: self.retry,
            timeout: self.timeout,
            classify: self.classify,
            fallback: self.fallback,
        }
    }
}

/// A guarded operation: each call runs the retry loop, and every attempt
/// passes through the breaker and the per-attempt timeout.
pub struct Guard<T, E> {
    breaker: Arc<CircuitBreaker>,
    retry: Option<RetryPolicy<T, GuardError<E>>>,
    timeout: Option<Duration>,
    classify: Classifier<E>,
    fallback: Option<Fallback<T>>,
}

impl<T, E> Clone for Guard<T, E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            retry: self.retry.clone(),
            timeout: self.timeout,
            classify: self.classify.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for Guard<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("breaker", &self.breaker.name())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<T, E> Guard<T, E>
where
    E: std::fmt::Display + 'static,
{
    /// The breaker shared by every guard built under the same name
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run the guarded operation, async.
    ///
    /// The operation closure is only invoked for admitted attempts; while
    /// the breaker is open it is never called.
    pub async fn call<F, Fut>(&self, mut op: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let executor = RetryExecutor::new(self.effective_policy());
        let result = executor
            .execute(|| {
                // Admission happens before the operation closure runs, so a
                // rejected attempt never touches the protected operation.
                let attempt = self.breaker.try_acquire().map(|()| op());
                async move {
                    match attempt {
                        Err(open) => Err(GuardError::CircuitOpen(open)),
                        Ok(fut) => self.run_admitted(fut).await,
                    }
                }
            })
            .await;
        self.absorb_open(result)
    }

    /// Run the guarded operation on the calling thread.
    ///
    /// Attempts may be abandoned at the per-attempt deadline, so the
    /// operation must be shareable with the worker that runs it.
    pub fn call_blocking<F>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let op = Arc::new(op);
        let executor = RetryExecutor::new(self.effective_policy());
        let result = executor.execute_blocking(|| match self.breaker.try_acquire() {
            Err(open) => Err(GuardError::CircuitOpen(open)),
            Ok(()) => {
                let outcome = match self.timeout {
                    Some(duration) => {
                        let op = op.clone();
                        timeout::bounded_blocking(duration, move || op())
                    }
                    None => op().map_err(GuardError::Inner),
                };
                self.record_outcome(&outcome);
                outcome
            }
        });
        self.absorb_open(result)
    }

    async fn run_admitted<Fut>(&self, fut: Fut) -> Result<T, GuardError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = match self.timeout {
            Some(duration) => timeout::bounded(duration, fut).await,
            None => fut.await.map_err(GuardError::Inner),
        };
        self.record_outcome(&outcome);
        outcome
    }

    fn record_outcome(&self, outcome: &Result<T, GuardError<E>>) {
        match outcome {
            Ok(_) => self.breaker.on_success(),
            Err(GuardError::Timeout(_)) => self.breaker.on_timeout(),
            Err(GuardError::Inner(e)) => self.breaker.on_failure((self.classify)(e)),
            // An admitted attempt cannot produce this variant.
            Err(GuardError::CircuitOpen(_)) => {}
        }
    }

    /// Retry policy for the executor. A short-circuited attempt is never
    /// retried: within one call the breaker would reject every repeat.
    fn effective_policy(&self) -> RetryPolicy<T, GuardError<E>> {
        let base = match &self.retry {
            Some(policy) => policy.clone(),
            None => RetryPolicy::new(RetryConfig {
                max_attempts: 1,
                ..Default::default()
            }),
        };
        let user_pred = base.failure_predicate();
        base.retry_on_failure(move |e: &GuardError<E>| !e.is_circuit_open() && user_pred(e))
    }

    fn absorb_open(&self, result: Result<T, GuardError<E>>) -> Result<T, GuardError<E>> {
        match result {
            Err(GuardError::CircuitOpen(open)) => match &self.fallback {
                Some(fallback) => {
                    debug!(name = %self.breaker.name(), "Circuit open, serving fallback");
                    Ok(fallback())
                }
                None => Err(GuardError::CircuitOpen(open)),
            },
            other => other,
        }
    }
}
