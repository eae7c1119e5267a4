use crate::breaker::CircuitState;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Raised by a circuit breaker when it short-circuits a call without
/// invoking the protected operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    /// Name the breaker was registered under
    pub name: String,
    /// State observed when the call was rejected
    pub state: CircuitState,
    /// When the most recent classified failure was recorded
    pub last_failure_time: Option<Instant>,
}

/// Failure surfaced by a guarded call.
///
/// `Inner` carries the protected operation's own error untouched, so the
/// caller's error-handling paths keep working when a guard is introduced.
#[derive(Error, Debug)]
pub enum GuardError<E> {
    /// The breaker rejected the call without running the operation
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The attempt exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself failed
    #[error("{0}")]
    Inner(E),
}

impl<E> GuardError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GuardError::Timeout(_))
    }

    /// The operation's own error, if that is what this failure carries.
    pub fn into_inner(self) -> Option<E> {
        match self {
            GuardError::Inner(e) => Some(e),
            _ => None,
        }
    }
}
