//! Wall-clock bounds for a single attempt.
//!
//! The async variant leans on `tokio::time::timeout` and cancels the
//! attempt by dropping its future. The blocking variant runs the attempt on
//! its own worker thread and abandons it at the deadline, so any number of
//! callers can time out independently; the abandoned worker's eventual
//! result is discarded and never double-recorded.

use crate::error::GuardError;
use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Bound an async operation to `duration`.
pub async fn bounded<T, E, Fut>(duration: Duration, fut: Fut) -> Result<T, GuardError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result.map_err(GuardError::Inner),
        Err(_) => {
            warn!(timeout = ?duration, "Operation exceeded deadline");
            Err(GuardError::Timeout(duration))
        }
    }
}

/// Bound a blocking operation to `duration`.
///
/// The closure runs on a dedicated worker thread; if the deadline elapses
/// first the caller gets `GuardError::Timeout` and the worker is left to
/// finish into a dropped channel.
pub fn bounded_blocking<T, E, F>(duration: Duration, op: F) -> Result<T, GuardError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::spawn(move || {
        // Send fails only when the caller has already timed out and gone.
        let _ = tx.send(op());
    });

    match rx.recv_timeout(duration) {
        Ok(result) => result.map_err(GuardError::Inner),
        Err(_) => {
            warn!(timeout = ?duration, "Blocking operation exceeded deadline, abandoning worker");
            Err(GuardError::Timeout(duration))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result: Result<u32, GuardError<&str>> =
            bounded(Duration::from_secs(1), async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);

        let result: Result<u32, GuardError<&str>> =
            bounded(Duration::from_secs(1), async { Err("bad") }).await;
        assert_eq!(result.unwrap_err().into_inner(), Some("bad"));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), GuardError<&str>> = bounded(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(result.unwrap_err().is_timeout());
    }

    #[test]
    fn test_bounded_blocking_passes_result_through() {
        let result: Result<u32, GuardError<&str>> =
            bounded_blocking(Duration::from_secs(1), || Ok(5));
        assert_eq!(result.unwrap(), 5);

        let result: Result<u32, GuardError<&str>> =
            bounded_blocking(Duration::from_secs(1), || Err("bad"));
        assert_eq!(result.unwrap_err().into_inner(), Some("bad"));
    }

    #[test]
    fn test_bounded_blocking_times_out() {
        let start = std::time::Instant::now();
        let result: Result<(), GuardError<&str>> =
            bounded_blocking(Duration::from_millis(50), || {
                thread::sleep(Duration::from_secs(5));
                Ok(())
            });

        assert!(result.unwrap_err().is_timeout());
        // The caller returns at the deadline, not when the worker finishes.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_blocking_timeouts_are_independent() {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                thread::spawn(move || {
                    bounded_blocking::<u32, &str, _>(Duration::from_millis(40), move || {
                        if i % 2 == 0 {
                            thread::sleep(Duration::from_secs(2));
                        }
                        Ok(i)
                    })
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.join().unwrap();
            if i % 2 == 0 {
                assert!(result.unwrap_err().is_timeout());
            } else {
                assert_eq!(result.unwrap(), i as u32);
            }
        }
    }
}
