//! Bounded retry with a delay between attempts.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DataError, Result};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Re-invokes a failing operation up to `max_attempts` times in total.
///
/// Every failure is retried except [`DataError::Cancelled`]. After the last
/// attempt the last failure is returned as-is. The delay between attempts is
/// `delay`, multiplied by `backoff` after each failure and capped at
/// `max_delay`; the default `backoff` of 1.0 keeps it fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl RetryPolicy {
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: 1.0,
            max_delay: delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Grow the delay by `base` after every failed attempt, up to `max_delay`.
    #[must_use]
    pub fn with_backoff(mut self, base: f64, max_delay: Duration) -> Self {
        self.backoff = if base.is_finite() && base >= 1.0 { base } else { 1.0 };
        self.max_delay = max_delay.max(self.delay);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn next_delay(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        let grown = current.as_secs_f64() * self.backoff;
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// Waiting between attempts races `cancel`; a cancellation returns
    /// [`DataError::Cancelled`] immediately without further attempts.
    pub async fn run<T>(
        &self,
        cancel: &CancellationToken,
        mut operation: impl AsyncFnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        let mut delay = self.delay;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        attempts = self.max_attempts,
                        error = %err,
                        "all retry attempts failed"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DataError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    delay = self.next_delay(delay);
                }
            }
        }
    }

    /// Like [`run`](Self::run), lending `context` (typically a connection
    /// handle) to every attempt.
    pub async fn run_on<C, T>(
        &self,
        context: &mut C,
        cancel: &CancellationToken,
        mut operation: impl AsyncFnMut(&mut C) -> Result<T>,
    ) -> Result<T>
    where
        C: ?Sized,
    {
        self.run(cancel, async || operation(&mut *context).await).await
    }
}
