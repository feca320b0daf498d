//! Retry decisions and exponential backoff for transient connector failures.
//!
//! Stateless: the caller tracks the attempt number and passes the workflow's
//! `RetryPolicy`. Only transient failures are ever retried; validation,
//! approval rejection and permanent connector errors are terminal.

use std::time::Duration;

use opsflow_types::workflow::RetryPolicy;
use tokio_util::sync::CancellationToken;

use crate::connector::ConnectorError;

/// Hard cap on a single backoff delay (60 s).
pub const MAX_BACKOFF_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry handler for action step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether attempt `attempt` (1-based) may be followed by another.
    ///
    /// `max_retries` counts retries after the first attempt, so a policy of
    /// 3 allows up to 4 invocations.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &ConnectorError) -> bool {
        error.is_transient() && attempt <= policy.max_retries
    }

    /// Delay before the retry that follows attempt `attempt`:
    /// `backoff_ms * 2^(attempt-1)`, capped at `max_backoff_ms`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, max_backoff_ms: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let ms = policy
            .backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
    pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, backoff_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms,
        }
    }

    #[test]
    fn test_should_retry_transient_within_limit() {
        let p = policy(3, 100);
        let err = ConnectorError::Transient("503".into());
        assert!(RetryHandler::should_retry(&p, 1, &err));
        assert!(RetryHandler::should_retry(&p, 3, &err));
        assert!(!RetryHandler::should_retry(&p, 4, &err));
    }

    #[test]
    fn test_permanent_never_retried() {
        let p = policy(3, 100);
        let err = ConnectorError::Permanent("404".into());
        assert!(!RetryHandler::should_retry(&p, 1, &err));
    }

    #[test]
    fn test_zero_retries() {
        let p = policy(0, 100);
        assert!(!RetryHandler::should_retry(&p, 1, &ConnectorError::Transient("x".into())));
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(5, 1000);
        assert_eq!(RetryHandler::backoff_delay(&p, 1, MAX_BACKOFF_MS), Duration::from_millis(1000));
        assert_eq!(RetryHandler::backoff_delay(&p, 2, MAX_BACKOFF_MS), Duration::from_millis(2000));
        assert_eq!(RetryHandler::backoff_delay(&p, 3, MAX_BACKOFF_MS), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_capped() {
        let p = policy(20, 1000);
        assert_eq!(RetryHandler::backoff_delay(&p, 10, MAX_BACKOFF_MS), Duration::from_millis(60_000));
        assert_eq!(RetryHandler::backoff_delay(&p, 40, MAX_BACKOFF_MS), Duration::from_millis(60_000));
        assert_eq!(RetryHandler::backoff_delay(&p, 3, 1500), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_sleep_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!RetryHandler::sleep_or_cancel(Duration::from_secs(30), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let cancel = CancellationToken::new();
        assert!(RetryHandler::sleep_or_cancel(Duration::from_millis(10), &cancel).await);
    }
}
