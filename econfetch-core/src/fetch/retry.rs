//! Bounded exponential backoff around a single upstream call.
//!
//! Timing is injected through [`Sleeper`] so tests can record waits instead of
//! blocking the thread.

use crate::error::DataError;
use std::time::Duration;
use tracing::warn;

/// Source of blocking waits (retry backoff and inter-request pacing).
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Upper bound on an upstream-supplied `Retry-After` wait.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Retry policy: at most `max_attempts` tries, waiting `base_delay * 2^n`
/// after the n-th failed attempt (1-based). No wait follows the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_retry_after: Duration,
}

impl RetryPolicy {
    /// A policy with `max_attempts` tries. Zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }

    /// Cap for waits requested through `Retry-After`.
    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    pub fn max_retry_after(&self) -> Duration {
        self.max_retry_after
    }

    /// Single attempt, never waits.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff after the given failed attempt (1-based).
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.min(31));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. A rate-limit error carrying a
    /// `Retry-After` duration waits that long (capped at `max_retry_after`)
    /// instead of the computed backoff.
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, mut op: F) -> Result<T, DataError>
    where
        F: FnMut(u32) -> Result<T, DataError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(DataError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let wait = match e.retry_after() {
                        Some(asked) => asked.min(self.max_retry_after),
                        None => self.backoff(attempt),
                    };
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        error = %e,
                        "request failed, retrying"
                    );
                    sleeper.sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}
