//! Retry Executor
//!
//! Runs a fetcher with bounded exponential backoff.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::fetch::Fetcher;

// == Retry Policy ==
/// Bounded exponential backoff settings, applied per fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub base_delay: Duration,
    /// Multiplier applied to the wait for each further attempt
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// Wait before the 1-based `attempt`.
    ///
    /// Attempt 1 starts immediately; attempt `i + 1` waits
    /// `base_delay * backoff_factor^(i - 1)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

// == Retry Executor ==
/// Wraps fetchers with a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs `fetcher` under this executor's policy.
    pub async fn run<V>(&self, key: &str, fetcher: &Fetcher<V>) -> Result<V> {
        Self::run_with(self.policy, key, fetcher).await
    }

    /// Runs `fetcher` until it succeeds or `policy.max_attempts` attempts have failed.
    ///
    /// Each attempt is a fresh call. The returned error carries the last
    /// attempt's error.
    pub async fn run_with<V>(policy: RetryPolicy, key: &str, fetcher: &Fetcher<V>) -> Result<V> {
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!(key = %key, attempt, ?delay, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            match fetcher().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(key = %key, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    warn!(key = %key, attempt, max_attempts, error = %err, "Fetch attempt failed");
                    last_error = format!("{err:#}");
                }
            }
        }

        Err(CacheError::FetchFailed {
            key: key.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fetcher;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
        }
    }

    /// Fetcher failing `failures` times before succeeding, recording attempt start times.
    fn flaky(failures: u32, starts: Arc<Mutex<Vec<Instant>>>) -> (Fetcher<&'static str>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let f = fetcher(move || {
            let calls = counter.clone();
            let starts = starts.clone();
            async move {
                starts.lock().push(Instant::now());
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    anyhow::bail!("transient failure #{n}");
                }
                Ok("payload")
            }
        });
        (f, calls)
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy(4);
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), Duration::from_millis(10));
        assert_eq!(p.delay_before(3), Duration::from_millis(20));
        assert_eq!(p.delay_before(4), Duration::from_millis(40));
    }

    #[test]
    fn test_delay_schedule_no_retries() {
        assert_eq!(RetryPolicy::none().delay_before(1), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_backoff() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let (f, calls) = flaky(2, starts.clone());

        let value = RetryExecutor::new(policy(3)).run("users", &f).await.unwrap();

        assert_eq!(value, "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let starts = starts.lock();
        assert!(starts[1] - starts[0] >= Duration::from_millis(10));
        assert!(starts[2] - starts[1] >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_carry_last_error() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let (f, calls) = flaky(u32::MAX, starts);

        let err = RetryExecutor::new(policy(3)).run("users", &f).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            CacheError::FetchFailed { key, attempts, last_error } => {
                assert_eq!(key, "users");
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "transient failure #3");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let (f, calls) = flaky(0, starts);

        let result = RetryExecutor::run_with(policy(0), "posts", &f).await;

        tokio_test::assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
