//! Activity runner: bounded retries with exponential backoff and a
//! per-attempt timeout.
//!
//! Only failures whose kind is retryable (fetch, rate limiter, timeout) are
//! attempted again. Everything else, and the last retryable failure once the
//! budget is spent, is returned unchanged to the caller.

use std::future::Future;
use std::time::Duration;

use steward_core::config::RetrySettings;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            timeout: Duration::from_secs(settings.activity_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `f` under `policy`. `f` receives the 1-based attempt number.
pub async fn run_activity<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, SyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.timeout, f(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                activity: name.to_owned(),
                after: policy.timeout,
            }),
        };
        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(activity = name, attempt, "activity recovered");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    activity = name,
                    attempt,
                    kind = %err.kind(),
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "activity failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(activity = name, attempt, kind = %err.kind(), error = %err, "activity failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use steward_adapter::AdapterError;

    use crate::error::ErrorKind;

    fn fetch_error() -> SyncError {
        SyncError::from(AdapterError::fetch("people.people.list", "503"))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(1500),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_recovers_within_budget() {
        let calls = AtomicU32::new(0);
        let value = run_activity("flaky", &RetryPolicy::default(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(fetch_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_original_kind() {
        let calls = AtomicU32::new(0);
        let err = run_activity("down", &RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(fetch_error()) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = run_activity("bad", &RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(SyncError::EntityNotFound {
                    entity_type: "person".into(),
                    id: "per_x".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntityNotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let policy = RetryPolicy {
            max_attempts: 1,
            timeout: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        let err = run_activity("slow", &policy, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, SyncError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
