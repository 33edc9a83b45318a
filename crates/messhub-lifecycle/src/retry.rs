//! Bounded exponential-backoff retry for remote calls.
//!
//! [`retry_with_backoff`] attempts an operation up to `max_attempts` times,
//! sleeping `base_delay * 2^attempt` between attempts (no jitter). Attempts are
//! strictly sequential. When every attempt fails, the last error and the number
//! of attempts made are handed to a tagging callback so callers can enrich the
//! error before it is classified.

use std::future::Future;
use std::time::Duration;

/// Attempts and delays for one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
}

/// Attempts used by domain services.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay used by domain services.
pub const RETRY_DELAY: Duration = Duration::from_millis(1_000);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: RETRY_DELAY,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay after the failed attempt with zero-based index `attempt`.
    ///
    /// | attempt | delay (base 1 s) |
    /// |---------|------------------|
    /// | 0       | 1 s              |
    /// | 1       | 2 s              |
    /// | 2       | 4 s              |
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        let delay = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` is reached.
///
/// On exhaustion `tag` receives the last error and the attempt count, and its
/// return value becomes the error.
pub async fn retry_with_backoff<T, E, R, F, Fut, C>(
    policy: RetryPolicy,
    mut operation: F,
    tag: C,
) -> Result<T, R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: FnOnce(E, u32) -> R,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= max_attempts {
                    tracing::warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(tag(err, attempt + 1));
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "remote call failed; retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_doubles_and_respects_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1_000))
            .with_max_delay(Duration::from_millis(3_000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(3_000));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<u32, String> = retry_with_backoff(
            RetryPolicy::new(3, Duration::ZERO),
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, String>(42)
                }
            },
            |err, _| err,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<u32, String> = retry_with_backoff(
            RetryPolicy::new(3, Duration::ZERO),
            || {
                let c = Arc::clone(&c);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("network down".to_owned())
                    } else {
                        Ok(7)
                    }
                }
            },
            |err, _| err,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn tag_receives_last_error_and_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), String> = retry_with_backoff(
            RetryPolicy::new(3, Duration::ZERO),
            || {
                let c = Arc::clone(&c);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), String>(format!("failure {n}"))
                }
            },
            |err, attempts| format!("{err} after {attempts} attempts"),
        )
        .await;
        assert_eq!(result.unwrap_err(), "failure 2 after 3 attempts");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_exponentially_between_attempts() {
        let started = tokio::time::Instant::now();
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&stamps);
        let _: Result<(), String> = retry_with_backoff(
            RetryPolicy::new(3, Duration::from_millis(1_000)),
            || {
                let s = Arc::clone(&s);
                async move {
                    s.lock().unwrap().push(started.elapsed());
                    Err::<(), String>("timeout".to_owned())
                }
            },
            |err, _| err,
        )
        .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(
            *stamps,
            vec![
                Duration::ZERO,
                Duration::from_millis(1_000),
                Duration::from_millis(3_000)
            ]
        );
    }
}
