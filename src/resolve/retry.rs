//! Bounded retry with exponential backoff for transient step failures.
//!
//! [`RetryPolicy`] wraps any failable asynchronous step: on a failure the
//! caller classifies as transient it waits `min(base_delay * 2^attempt,
//! max_delay)` plus ±10% jitter and tries again, up to a fixed attempt
//! ceiling; exhausting attempts propagates the last failure unchanged.
//!
//! The retry ceiling is an explicit loop counter rather than recursion, so
//! the depth is independently testable and the call stack stays flat.
//! Backoff sleeps race against a cancellation token - cancellation always
//! wins over a pending retry.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default maximum attempts (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Jitter applied to each delay, as a fraction of the delay (±10%).
const JITTER_FRACTION: f64 = 0.1;

/// Failure surfaced by a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed terminally: either the failure was not
    /// transient, or attempts were exhausted. Carries the last failure
    /// unchanged.
    #[error(transparent)]
    Operation(E),

    /// Cancellation arrived while a retry delay was pending.
    #[error("interrupted while waiting to retry")]
    Interrupted,
}

impl<E> RetryError<E> {
    /// Unwraps the inner operation error, if any.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::Interrupted => None,
        }
    }
}

/// Configuration for bounded retry with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^(attempt - 1), max_delay) * (1 ± 10%)
/// ```
///
/// With defaults, delays are approximately: 1s, 2s (before the third and
/// final attempt).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    /// Base delay for the first retry.
    base_delay: Duration,
    /// Delay cap.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` is clamped to
    /// at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Creates a policy with a custom attempt ceiling and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Executes `op` with bounded retry.
    ///
    /// `op` receives the 1-indexed attempt number. A failure is retried only
    /// while `is_transient` returns true and attempts remain; otherwise the
    /// failure propagates unchanged inside [`RetryError::Operation`]. The
    /// backoff sleep is a non-blocking suspension and races against
    /// `cancel`.
    ///
    /// # Errors
    ///
    /// [`RetryError::Operation`] with the last failure, or
    /// [`RetryError::Interrupted`] if cancellation won a pending retry.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_attempts && is_transient(&error) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt,
                        next_attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        "transient failure; will retry"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(RetryError::Interrupted),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return Err(RetryError::Operation(error)),
            }
        }
    }

    /// Calculates the backoff delay after the given 1-indexed attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as f64;
        let capped_ms = (base_ms * f64::from(1u32 << exponent))
            .min(self.max_delay.as_millis() as f64);

        let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        Duration::from_millis((capped_ms * (1.0 + jitter)) as u64)
    }
}
