// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policies with exponential backoff.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    #[error("operation failed after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's error.
        #[source]
        last: E,
    },
    /// The error did not match the retryable allow-list; it is re-raised
    /// without further attempts.
    #[error("non-retryable error")]
    NonRetryable(#[source] E),
}

impl<E> RetryError<E> {
    /// The underlying error, whichever way the retry loop ended.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NonRetryable(e) => e,
        }
    }
}

/// Exponential-backoff retry policy.
///
/// The delay before attempt `n + 1` is
/// `min(initial_delay * multiplier^n, max_delay)`.  When a retryable
/// allow-list is configured, only errors whose display form contains one of
/// the listed substrings are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    retryable: Option<Vec<String>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::new().build()
    }
}

impl RetryPolicy {
    /// Start building a policy.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Maximum number of attempts (including the first).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff delay before the attempt following attempt `attempt`
    /// (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Whether an error qualifies for another attempt.
    pub fn is_retryable<E: std::fmt::Display>(&self, error: &E) -> bool {
        match &self.retryable {
            None => true,
            Some(substrings) => {
                let text = error.to_string();
                substrings.iter().any(|s| text.contains(s.as_str()))
            }
        }
    }

    /// Run `op` until it succeeds or the policy is exhausted.
    ///
    /// A non-retryable error is re-raised immediately; otherwise the final
    /// attempt's error is re-raised after `max_attempts`.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !self.is_retryable(&e) => return Err(RetryError::NonRetryable(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        target: "loom.resilience",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    retryable: Option<Vec<String>>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    /// Defaults: 3 attempts, 100 ms initial delay, doubling, 30 s cap, all
    /// errors retryable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retryable: None,
        }
    }

    /// Maximum number of attempts (including the first); clamped to ≥ 1.
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    /// Backoff multiplier applied per attempt.
    #[must_use]
    pub fn multiplier(mut self, m: f64) -> Self {
        self.multiplier = m;
        self
    }

    /// Upper bound on any single delay.
    #[must_use]
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Only retry errors whose display form contains one of these
    /// substrings.
    #[must_use]
    pub fn retryable_errors<I, S>(mut self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable = Some(substrings.into_iter().map(Into::into).collect());
        self
    }

    /// Finalise the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            multiplier: self.multiplier,
            max_delay: self.max_delay,
            retryable: self.retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let out: Result<_, RetryError<std::io::Error>> = policy
            .execute(|| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, std::io::Error>(42) }
            })
            .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let policy = RetryPolicy::builder().max_attempts(5).build();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let out = policy
            .execute(move || {
                let n = calls2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(std::io::Error::other("flaky"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reraises_last_error() {
        let policy = RetryPolicy::builder().max_attempts(3).build();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let out: Result<(), _> = policy
            .execute(move || {
                let n = calls2.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(std::io::Error::other(format!("boom {n}"))) }
            })
            .await;
        match out.unwrap_err() {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("boom 3"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn allow_list_blocks_non_matching_errors() {
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .retryable_errors(["connection reset", "unavailable"])
            .build();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let out: Result<(), _> = policy
            .execute(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(std::io::Error::other("schema violation")) }
            })
            .await;
        assert!(matches!(out.unwrap_err(), RetryError::NonRetryable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_geometrically_and_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(350))
            .build();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        // 400 ms is capped to 350 ms.
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn into_inner_unwraps_both_variants() {
        let e: RetryError<&str> = RetryError::NonRetryable("a");
        assert_eq!(e.into_inner(), "a");
        let e = RetryError::Exhausted {
            attempts: 2,
            last: "b",
        };
        assert_eq!(e.into_inner(), "b");
    }
}
