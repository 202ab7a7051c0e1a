//! Bounded retry for transient store failures
//!
//! The persistence layer wraps operations that may hit connection loss or
//! statement timeouts in `retry`. Only errors classified as transient are
//! retried; everything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Retry policy: attempt count and fixed backoff between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Run `op` until it succeeds, a non-transient error occurs, or the policy
/// is exhausted.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    "⚠️ Transient failure in {} (attempt {}/{}): {}",
                    op_name, attempt, policy.max_attempts, err
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TapeflowError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry(quick_policy(), "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TapeflowError::TransientStore("connection reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(quick_policy(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TapeflowError::Validation("bad input".into())) }
        })
        .await;

        assert!(matches!(result, Err(TapeflowError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_exhaustion_returns_last_error() {
        let result: Result<()> = retry(quick_policy(), "test_op", || async {
            Err(TapeflowError::Timeout("statement timeout".into()))
        })
        .await;

        assert!(matches!(result, Err(TapeflowError::Timeout(_))));
    }
}
