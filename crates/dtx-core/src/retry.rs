//! Retry policy for the two retrying call sites (download, analysis service)
//!
//! The policy is a plain value: attempts, exponential backoff, jitter and a
//! cap. Whether an error is worth retrying, and whether the server asked for
//! a specific delay, is decided by the error through [`Retryable`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that can drive a retry loop
pub trait Retryable {
    /// Whether another attempt may succeed
    fn is_retryable(&self) -> bool;

    /// Server-provided delay before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Exponential backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Relative jitter in [0, 1]; 0.1 spreads delays by ±10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[inline]
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With max attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// With base delay
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With jitter fraction
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay after the given failed attempt (1-based), before jitter
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_secs_f64(capped.max(0.0) / 1_000.0)
    }

    /// Delay after the given failed attempt, with jitter applied
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        base.mul_f64(factor.max(0.0))
    }

    /// Longest time a [`run`](Self::run) can take when each attempt is cut
    /// off at `per_attempt`: every attempt plus the longest possible wait
    /// before each retry (jittered backoff, or a server delay capped at
    /// `max_delay_ms`).
    #[must_use]
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let max_attempts = self.max_attempts.max(1);
        let server_cap = Duration::from_millis(self.max_delay_ms);
        let jitter = 1.0 + self.jitter.clamp(0.0, 1.0);
        (1..max_attempts).fold(per_attempt * max_attempts, |total, attempt| {
            total + self.backoff(attempt).mul_f64(jitter).max(server_cap)
        })
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts
    /// run out. Returns the last error on failure.
    ///
    /// # Errors
    /// Propagates the final error from `operation`.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let max_delay = Duration::from_millis(self.max_delay_ms);
                    let delay = err
                        .retry_after()
                        .map_or_else(|| self.delay_for(attempt), |d| d.min(max_delay));
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Flaky {
        retryable: bool,
        after: Option<Duration>,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.retryable)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.retryable
        }

        fn retry_after(&self) -> Option<Duration> {
            self.after
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay_ms: 3_000,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(10), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = RetryPolicy::default().with_jitter(0.5);
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_jitter(0.0);
        let start = tokio::time::Instant::now();

        let result: Result<u32, Flaky> = policy
            .run("test", |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(Flaky { retryable: true, after: None })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), Flaky> = RetryPolicy::default()
            .run("test", |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky { retryable: false, after: None })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_capped() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), Flaky> = RetryPolicy::default()
            .with_max_attempts(3)
            .run("test", |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky { retryable: true, after: None })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_delay_overrides_backoff() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        let start = tokio::time::Instant::now();

        let _: Result<u32, Flaky> = policy
            .run("test", |attempt| async move {
                if attempt == 1 {
                    Err(Flaky { retryable: true, after: Some(Duration::from_secs(7)) })
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[test]
    fn worst_case_covers_every_attempt_and_wait() {
        let once = RetryPolicy::no_retry();
        assert_eq!(once.worst_case(Duration::from_secs(30)), Duration::from_secs(30));

        // server delays may reach max_delay_ms before each retry
        let default = RetryPolicy::default();
        assert_eq!(default.worst_case(Duration::from_secs(30)), Duration::from_secs(150));

        let jittered = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 500,
            jitter: 0.5,
        };
        let total = jittered.worst_case(Duration::from_secs(2)).as_secs_f64();
        assert!((total - 7.5).abs() < 1e-9, "{total}");
    }
}
