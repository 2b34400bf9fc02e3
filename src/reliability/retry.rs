//! Exponential backoff retry for transient gateway failures.
//!
//! Only idempotent gateway operations (order fetch) are retried inside the
//! engine; order creation is left to the client, which retries with a fresh
//! order because no local state exists after a creation timeout.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{EngineError, Result};

/// Configuration for retry behavior.
///
/// The delay between attempts grows exponentially up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry (default: 100ms).
    pub initial_delay: Duration,
    /// Ceiling on the delay between attempts (default: 5s).
    pub max_delay: Duration,
    /// Multiplier applied per attempt (default: 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "delays are small positive values well inside f64/u64 range"
        )]
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX)))
            as u64;
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Executes an operation with exponential backoff on transient errors.
///
/// Retries up to `policy.max_attempts` times. Non-transient errors
/// (validation, signature mismatch, not-found) return immediately; see
/// [`EngineError::is_transient`].
///
/// # Errors
///
/// Returns the last error encountered if all attempts fail, or the first
/// non-transient error.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, ?delay, %error, "transient gateway error, retrying");
                tokio::time::sleep(delay).await;
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error
        .unwrap_or_else(|| EngineError::Gateway("retry loop exhausted without error".to_owned())))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::with_max_attempts(5)
        };

        let result = retry_with_backoff(&policy, || {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if n < 2 {
                    Err(EngineError::Gateway("status 502".to_owned()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_fast() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::with_max_attempts(5);

        let result: Result<()> = retry_with_backoff(&policy, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Err(EngineError::SignatureMismatch) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::SignatureMismatch)));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::with_max_attempts(2)
        };

        let result: Result<()> = retry_with_backoff(&policy, || async {
            Err(EngineError::Gateway("status 503".to_owned()))
        })
        .await;

        match result {
            Err(EngineError::Gateway(msg)) => assert!(msg.contains("503")),
            other => panic!("expected gateway error, got {other:?}"),
        }
    }
}
