use super::errors::{ChainError, ChainResult};
use crate::metrics::metrics;
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration for rate-limited reads
///
/// Backoff is deterministic: `base_delay_ms * 2^attempt`, no jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial attempt)
    pub max_retries: u32,
    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// Calculate backoff delay for a given attempt (0-indexed)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Chunking configuration for bursts of reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            delay_ms: 100,
        }
    }
}

/// Run `operation`, retrying only on rate-limit errors.
///
/// Any other error, or a rate limit on the final attempt, is returned
/// immediately.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> ChainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChainResult<T>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !err.is_rate_limited() {
            return Err(err);
        }

        if attempt + 1 >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                error = %err,
                "All retry attempts exhausted"
            );
            return Err(err);
        }

        let backoff = policy.backoff(attempt);
        debug!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            "Rate limited, backing off before retry"
        );
        metrics().rate_limit_retries.inc();
        sleep(backoff).await;
        attempt += 1;
    }
}

/// Run deferred operations in chunks of `batch_size`.
///
/// Every operation in a chunk runs to completion even if a sibling fails; the
/// chunk then reports the first error in submission order. Results keep the
/// original order. `delay_ms` is slept between chunks, not after the last.
pub async fn batch_execute<F, Fut, T, E>(operations: Vec<F>, config: &BatchConfig) -> Result<Vec<T>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let batch_size = config.batch_size.max(1);
    let mut results = Vec::with_capacity(operations.len());
    let mut pending = operations.into_iter().peekable();

    while pending.peek().is_some() {
        let chunk: Vec<Fut> = pending.by_ref().take(batch_size).map(|op| op()).collect();
        for outcome in join_all(chunk).await {
            results.push(outcome?);
        }

        if pending.peek().is_some() && config.delay_ms > 0 {
            sleep(Duration::from_millis(config.delay_ms)).await;
        }
    }

    Ok(results)
}

/// Convenience constructor used by tests and mocks.
pub fn rate_limited(message: &str) -> ChainError {
    ChainError::RateLimited {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_retry_succeeds_on_first_attempt() {
        let policy = RetryPolicy::default();
        let result = with_retry("test_op", &policy, || async { Ok::<i32, ChainError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backs_off_one_then_two_seconds() {
        let policy = RetryPolicy::new(3, 1000);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();
        let started = Instant::now();
        let timestamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let timestamps_clone = timestamps.clone();

        let result = with_retry("test_op", &policy, || {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            timestamps_clone.lock().push(started.elapsed());
            async move {
                if count < 2 {
                    Err(rate_limited("429 Too Many Requests"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

        let timestamps = timestamps.lock();
        assert_eq!(timestamps[0], Duration::ZERO);
        assert_eq!(timestamps[1] - timestamps[0], Duration::from_millis(1000));
        assert_eq!(timestamps[2] - timestamps[1], Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_retry_fails_fast_on_other_errors() {
        let policy = RetryPolicy::default();
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: ChainResult<()> = with_retry("test_op", &policy, || {
            attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(ChainError::Transport("connection reset".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ChainError::Transport(_))));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_all_attempts() {
        let policy = RetryPolicy::new(3, 10);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: ChainResult<()> = with_retry("test_op", &policy, || {
            attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited("rate limit")) }
        })
        .await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_order_and_chunks() {
        let config = BatchConfig {
            batch_size: 2,
            delay_ms: 100,
        };
        let started = Instant::now();
        let operations: Vec<_> = (0..5u64)
            .map(|i| move || async move { Ok::<u64, ChainError>(i * 10) })
            .collect();

        let results = batch_execute(operations, &config).await.unwrap();

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        // Three chunks, two gaps between them
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_batch_failure_does_not_cancel_siblings() {
        let config = BatchConfig {
            batch_size: 3,
            delay_ms: 0,
        };
        let completed = Arc::new(AtomicUsize::new(0));

        let operations: Vec<_> = (0..3u64)
            .map(|i| {
                let completed = completed.clone();
                move || async move {
                    tokio::task::yield_now().await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    if i == 0 {
                        Err(ChainError::Contract("boom".to_string()))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();

        let result = batch_execute(operations, &config).await;

        assert!(result.is_err());
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }
}
