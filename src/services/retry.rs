//! Bounded retry schedule for remote fetches.
//!
//! Rate-limit and transient failures are retried a bounded number of
//! times. The schedule is an explicit little state machine (attempt
//! counter plus delay computation) so the bound is testable without any
//! clocks or timers.

use std::time::Duration;

/// Default number of attempts for a single remote fetch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff.
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single delay, including server hints.
const MAX_DELAY: Duration = Duration::from_secs(120);

/// Retry state for one remote operation.
///
/// Each failed attempt consumes one slot via [`RetrySchedule::next_delay`];
/// `None` means the attempts are exhausted and the failure should be
/// recorded for that resource.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    max_attempts: u32,
    attempt: u32,
}

impl RetrySchedule {
    /// Create a schedule allowing `max_attempts` total tries.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }

    /// Attempts consumed so far.
    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Register a failed attempt and compute the delay before the next one.
    ///
    /// A server-provided hint (rate-limit retry-after) takes precedence
    /// over the computed exponential delay; both are capped at [`MAX_DELAY`].
    /// Returns `None` once the final attempt has failed.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = BASE_DELAY * 2u32.saturating_pow(self.attempt - 1);
        let delay = hint.unwrap_or(backoff);
        Some(delay.min(MAX_DELAY))
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
