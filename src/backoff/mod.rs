//! Delay arithmetic for retry backoff.
//!
//! Pure functions: the same inputs and the same RNG state always produce
//! the same delay, which keeps retry timing testable with a seeded RNG.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay on every attempt
    Fixed,
    /// Delay grows proportionally to the attempt number
    Linear,
    /// Delay doubles on every attempt
    Exponential,
    /// Delay follows the Fibonacci sequence
    Fibonacci,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

/// Raw delay for a 1-indexed attempt, before jitter, capped at `max`.
///
/// Uses saturating arithmetic so large attempt numbers clamp to `max`
/// instead of overflowing.
pub fn raw_delay(
    strategy: BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
) -> Duration {
    let attempt = attempt.max(1);
    let delay = match strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        BackoffStrategy::Fibonacci => base.saturating_mul(fibonacci(attempt)),
    };
    delay.min(max)
}

/// Subtract a uniform jitter drawn from `[0, min(max_jitter, raw / 10)]`.
///
/// Jitter decorrelates simultaneous retries; subtracting (rather than
/// adding) keeps every final delay within `[0.9 * raw, raw]` when
/// `max_jitter` is not the binding limit.
pub fn jittered_delay<R: Rng + ?Sized>(
    raw: Duration,
    max_jitter: Duration,
    rng: &mut R,
) -> Duration {
    let bound = max_jitter.min(raw / 10);
    if bound.is_zero() {
        return raw;
    }
    let jitter_nanos = rng.gen_range(0..=bound.as_nanos() as u64);
    raw.saturating_sub(Duration::from_nanos(jitter_nanos))
}

/// Full delay computation for one retry attempt: strategy, cap, jitter.
pub fn compute_delay<R: Rng + ?Sized>(
    strategy: BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
    max_jitter: Duration,
    rng: &mut R,
) -> Duration {
    jittered_delay(raw_delay(strategy, attempt, base, max), max_jitter, rng)
}

fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n <= 2 {
        1
    } else {
        b
    }
}
