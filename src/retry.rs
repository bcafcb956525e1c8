//! Shared retry policy.
//!
//! One policy type, parameterised per call site: the acquirer retries a fixed number of
//! times back to back (the fetch tool already waits internally), while database
//! initialisation uses jittered exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff settings. Delay = base * 2^attempt (+ jitter), capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds random jitter in [0, base_delay / 2).
    pub jitter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    /// Retry immediately, up to `max_attempts` attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: None,
        }
    }

    pub fn with_backoff(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Some(backoff),
        }
    }

    /// Delay after the failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(backoff) = &self.backoff else {
            return Duration::ZERO;
        };

        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = backoff
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(backoff.max_delay)
            .min(backoff.max_delay);

        if !backoff.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(backoff.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return capped;
        }
        let jitter_ms = rand::random::<u64>() % jitter_range_ms;
        (capped + Duration::from_millis(jitter_ms)).min(backoff.max_delay)
    }
}

/// Result of a single attempt, as classified by the caller.
pub enum RetryAction<T, E> {
    Success(T),
    /// Transient failure, worth another attempt.
    Retry(E),
    /// Permanent failure, stop now.
    Fail(E),
}

/// Why [`retry`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: E },
    /// An attempt failed with a permanent error.
    Aborted { attempts: u32, error: E },
}

/// Run `operation` under `policy`. The closure receives the 0-indexed attempt number.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(error) => {
                return Err(RetryFailure::Aborted {
                    attempts: attempt + 1,
                    error,
                })
            }
            RetryAction::Retry(error) => {
                if attempt + 1 >= max_attempts {
                    return Err(RetryFailure::Exhausted {
                        attempts: attempt + 1,
                        last_error: error,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
