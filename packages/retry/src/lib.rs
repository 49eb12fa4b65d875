#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Retry with bounded exponential backoff.
//!
//! Both the portal client and the geocoders wrap their network calls in a
//! [`RetryPolicy`]. The call site supplies the predicate that decides
//! whether a failure is transient (retry after a delay) or permanent
//! (propagate immediately).
//!
//! ```ignore
//! let policy = RetryPolicy::default();
//! let body = policy
//!     .execute("portal search", || fetch_csv(&client), PortalError::is_transient)
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of attempts (the first call plus six retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 7;

/// Default wait before the first retry.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;

/// Default upper bound for a single wait.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Why a retried operation ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },

    /// The operation failed with an error the predicate did not consider
    /// transient.
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// Returns the underlying error of the last attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Permanent(last) => last,
        }
    }

    /// Whether the retry budget was used up.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Bounded exponential backoff: `initial_delay`, doubling after every
/// failed attempt, capped at `max_delay`, for at most `max_attempts`
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single wait, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy from explicit durations.
    /// Durations too long for a `u64` of milliseconds saturate.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: saturating_millis(initial_delay),
            max_delay_ms: saturating_millis(max_delay),
        }
    }

    /// Number of attempts this policy will make. Never less than one.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// The full wait schedule: one entry per retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.attempts()).map(|retry| self.delay_for(retry))
    }

    /// Runs `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent.
    ///
    /// `operation` is called once per attempt to build a fresh future.
    /// `is_transient` classifies each failure; only transient failures are
    /// retried. Waits use `tokio::time::sleep`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Permanent`] for the first non-transient
    /// failure, or [`RetryError::Exhausted`] with the last error once every
    /// attempt failed transiently.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut operation: F,
        is_transient: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= attempts => {
                    log::error!("{label}: giving up after {attempts} attempts: {e}");
                    return Err(RetryError::Exhausted { attempts, last: e });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    log::warn!("{label}: attempt {attempt}/{attempts} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Returns `true` if an HTTP error is likely transient and worth retrying.
#[must_use]
pub fn is_transient_http(e: &reqwest::Error) -> bool {
    if let Some(status) = e.status() {
        return status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    }
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Flaky,
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    const fn is_flaky(e: &TestError) -> bool {
        matches!(e, TestError::Flaky)
    }

    #[test]
    fn default_schedule_doubles_up_to_cap() {
        let delays: Vec<u64> = RetryPolicy::default()
            .delays()
            .map(|d| u64::try_from(d.as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
    }

    #[test]
    fn schedule_is_non_decreasing() {
        let policy = RetryPolicy::new(40, Duration::from_millis(3), Duration::from_secs(300));
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(delays.len(), 39);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn oversized_durations_saturate() {
        let policy = RetryPolicy::new(3, Duration::MAX, Duration::MAX);
        assert_eq!(policy.initial_delay_ms, u64::MAX);
        assert_eq!(policy.max_delay_ms, u64::MAX);
        assert_eq!(policy.delay_for(2), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn deserializes_partial_config() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 3").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, DEFAULT_INITIAL_DELAY_MS);
        assert_eq!(policy.max_delay_ms, DEFAULT_MAX_DELAY_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = policy
            .execute(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Flaky) }
                },
                is_flaky,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(err.into_inner(), TestError::Flaky);
        assert_eq!(start.elapsed(), policy.delays().sum::<Duration>());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::default()
            .execute(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Fatal) }
                },
                is_flaky,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent(TestError::Fatal))));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::default()
            .execute(
                "test",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TestError::Flaky)
                        } else {
                            Ok(n)
                        }
                    }
                },
                is_flaky,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
