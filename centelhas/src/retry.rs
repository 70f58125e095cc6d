//! Bounded retry for conflicting units of work.

use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::errors::CentelhaResult;

/// Backoff for retry number `retry` with up to 50% random jitter added
fn jittered(policy: &RetryPolicy, retry: u32) -> Duration {
    let base = policy.backoff_for(retry);
    let spread = (base.as_millis() as u64) / 2;
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=spread))
}

/// Run `op`, retrying while it fails with a retryable error
///
/// Each call to `op` must open its own unit of work so that a retry starts
/// from fresh state. Errors other than conflicts are returned immediately;
/// once the policy is exhausted the last conflict is returned.
///
/// # Arguments
///
/// * `policy` - Attempt bound and backoff
/// * `what` - Operation name used in log lines
/// * `op` - Factory producing one attempt
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> CentelhaResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CentelhaResult<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = jittered(policy, retry);
                warn!(
                    "{what} conflicted ({err}); retry {retry}/{} in {delay:?}",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CentelhaError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_conflict_then_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(3), "append", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CentelhaError::Conflict("busy".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_conflict() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: CentelhaResult<()> = with_retry(&fast(2), "append", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CentelhaError::Conflict("busy".to_string()))
        })
        .await;

        assert!(matches!(result, Err(CentelhaError::Conflict(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: CentelhaResult<()> = with_retry(&fast(5), "append", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CentelhaError::Validation("delta must be non-zero".to_string()))
        })
        .await;

        assert!(matches!(result, Err(CentelhaError::Validation(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_stays_within_half_of_base() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
        };
        for _ in 0..50 {
            let delay = jittered(&policy, 1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
