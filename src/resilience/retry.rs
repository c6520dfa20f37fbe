//! Retry and fallback helpers.

use crate::defaults;
use crate::error::Result;
use crate::resilience::Resilience;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_SEND_RETRIES,
            base_delay: Duration::from_millis(defaults::BASE_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Run `op` with exponential-backoff retries, recording each failure.
///
/// Returns the first success, or the last error once retries are exhausted.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    resilience: &Resilience,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => {
                resilience.record_success(operation);
                return Ok(value);
            }
            Err(e) => {
                resilience.record_failure(operation, &e.to_string());
                if retry >= policy.max_retries {
                    return Err(e);
                }
                retry += 1;
                let delay = policy.delay_for(retry);
                debug!(operation, retry, ?delay, "retrying after failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run `primary`; on any failure record it and run `fallback` instead.
pub async fn with_fallback<T, P, PF, B, BF>(
    operation: &str,
    resilience: &Resilience,
    primary: P,
    fallback: B,
) -> T
where
    P: FnOnce() -> PF,
    PF: Future<Output = Result<T>>,
    B: FnOnce() -> BF,
    BF: Future<Output = T>,
{
    match primary().await {
        Ok(value) => {
            resilience.record_success(operation);
            value
        }
        Err(e) => {
            resilience.record_failure(operation, &e.to_string());
            fallback().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttuneError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn flaky(failures_before_success: u32) -> (Arc<AtomicU32>, impl FnMut() -> FlakyFut) {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            FlakyFut {
                fail: n < failures_before_success,
            }
        };
        (attempts, op)
    }

    struct FlakyFut {
        fail: bool,
    }

    impl Future for FlakyFut {
        type Output = Result<u32>;
        fn poll(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Self::Output> {
            if self.fail {
                std::task::Poll::Ready(Err(AttuneError::SttUnavailable {
                    message: "flaky".to_string(),
                }))
            } else {
                std::task::Poll::Ready(Ok(99))
            }
        }
    }

    #[test]
    fn test_delay_doubles_per_retry() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn test_with_retry_returns_first_success() {
        let resilience = Resilience::new();
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
        };
        let (attempts, op) = flaky(2);

        let result = with_retry("op", policy, &resilience, op).await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max() {
        let resilience = Resilience::new();
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let (attempts, op) = flaky(10);

        let result = with_retry("op", policy, &resilience, op).await;
        assert!(result.is_err());
        // Initial attempt + 2 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_backoff_is_exponential() {
        let resilience = Resilience::new();
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(20),
        };
        let (_, op) = flaky(10);

        let started = Instant::now();
        let _ = with_retry("op", policy, &resilience, op).await;
        // 20ms + 40ms of backoff at minimum
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_with_retry_records_failures_and_warns() {
        let resilience = Resilience::new();
        let mut warnings = resilience.subscribe_warnings();
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let (_, op) = flaky(10);

        let _ = with_retry("stt_send", policy, &resilience, op).await;
        let warning = warnings.try_recv().unwrap();
        assert_eq!(warning.operation, "stt_send");
        assert_eq!(warning.count, 3);
    }

    #[tokio::test]
    async fn test_with_fallback_uses_primary_on_success() {
        let resilience = Resilience::new();
        let value = with_fallback(
            "llm",
            &resilience,
            || async { Ok("primary") },
            || async { "fallback" },
        )
        .await;
        assert_eq!(value, "primary");
    }

    #[tokio::test]
    async fn test_with_fallback_runs_fallback_on_failure() {
        let resilience = Resilience::new();
        let value = with_fallback(
            "llm",
            &resilience,
            || async {
                Err::<&str, _>(AttuneError::LlmUnavailable {
                    message: "down".to_string(),
                })
            },
            || async { "fallback" },
        )
        .await;
        assert_eq!(value, "fallback");

        let snapshot = resilience.snapshot();
        assert_eq!(snapshot.failures[0].operation, "llm");
        assert_eq!(snapshot.failures[0].count, 1);
    }
}
