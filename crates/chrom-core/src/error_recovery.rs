//! Bounded retry for safety-relevant hardware writes.
//
// Stopping pumps and closing valves must not give up on the first transient
// bus error. Everything else fails fast.

use crate::error::ChromResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Defines a policy for retrying an operation.
///
/// Specifies how many times to try a failed operation and how long to wait
/// between attempts.
///
/// # Example
///
/// ```rust
/// use chrom_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     backoff_delay: Duration::from_millis(200),
/// };
/// assert_eq!(policy.max_attempts, 5);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    ///
    /// Zero is treated as one.
    pub max_attempts: u32,

    /// Constant delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts with 100ms between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::ZERO,
        }
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// Returns the last error when every attempt fails. `label` is only used for
/// logging.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> ChromResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChromResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "Retrying after failure"
                );
                sleep(policy.backoff_delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    operation = label,
                    attempts,
                    error = %err,
                    "Giving up after repeated failures"
                );
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChromError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        };
        let result = retry_with_policy(&policy, "close_valve", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 2 {
                Ok(n)
            } else {
                Err(ChromError::hardware("valve 3", "set_opening", "bus busy"))
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        };
        let result: ChromResult<()> = retry_with_policy(&policy, "stop_pump", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChromError::hardware("pump 7", "set_running", "no reply"))
        })
        .await;
        assert!(matches!(result, Err(ChromError::HardwareCommand { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff_delay: Duration::ZERO,
        };
        let _ = retry_with_policy(&policy, "noop", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ChromError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
