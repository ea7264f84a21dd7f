//! Bounded exponential backoff for transient infrastructure failures.

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::constants::{
    DEFAULT_PUBLISH_BACKOFF_MS, DEFAULT_PUBLISH_MAX_ATTEMPTS, DEFAULT_PUBLISH_MAX_BACKOFF_MS,
    DEFAULT_STORE_MAX_ATTEMPTS,
};
use crate::errors::Result;

/// Retry bounds for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Treated as at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier: 2,
        }
    }

    /// Policy for publishing staged events.
    pub fn publish_default() -> Self {
        Self::new(
            DEFAULT_PUBLISH_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_PUBLISH_BACKOFF_MS),
            Duration::from_millis(DEFAULT_PUBLISH_MAX_BACKOFF_MS),
        )
    }

    /// Policy for durable store writes.
    pub fn store_default() -> Self {
        Self::new(
            DEFAULT_STORE_MAX_ATTEMPTS,
            Duration::from_millis(50),
            Duration::from_millis(1_000),
        )
    }

    /// Retries without sleeping. Meant for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::publish_default()
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempt ceiling is reached. The last error is returned.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, attempt, max_attempts, delay, err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        );
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::immediate(0).attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(3);
        let result = retry_transient(&policy, "store write", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::StoreUnavailable("locked".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_ceiling() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(2);
        let result: Result<()> = retry_transient(&policy, "store write", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::StoreUnavailable("down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_caller_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(5);
        let result: Result<()> = retry_transient(&policy, "store write", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Unexpected("bad".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
