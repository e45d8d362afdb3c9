//! Retry-with-backoff helper for transient database errors
//!
//! Implements bounded exponential backoff for operations that may hit a
//! transient SQLite contention error (`database is locked`) or a
//! unique-key race from a concurrent `upsert_*` call. Non-transient errors
//! are returned immediately without retrying.

use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Retry `operation` with exponential backoff until `max_attempts` is
/// reached or `max_wait` elapses, whichever comes first.
///
/// Only errors considered transient (`is_transient`) are retried; anything
/// else is returned on the first attempt.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    max_wait: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut backoff = Duration::from_millis(10);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if attempt < max_attempts && is_transient(&err) && start.elapsed() < max_wait => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying transient error"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(1000));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Whether an error is worth retrying: SQLite "database is locked"/"busy"
/// conditions and unique-key conflicts from a concurrent upsert race.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db_err)) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("locked") || msg.contains("busy") || db_err.is_unique_violation()
        }
        Error::Database(sqlx::Error::PoolTimedOut) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_error_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_transient("test", 5, Duration::from_secs(1), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Database(sqlx::Error::PoolTimedOut))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_transient("test", 5, Duration::from_secs(1), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotFound("x".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
