//! Deciding when to retry a failed background refresh
//!
//! Failures from this crate are classified with [`Error::is_transient`]:
//! permanent failures end the refresh loop, and transient ones are retried
//! after an exponentially growing delay. When the authority sent a
//! `Retry-After` header, the retry waits at least that long. Failures from
//! other crates are treated as transient.

use std::{error, time::Duration};

use crate::{Error, RetrieveError};

/// Delays between retries of a failing refresh
///
/// The first retry waits `initial_delay`, and each consecutive failure
/// multiplies the delay by `multiplier`, up to `max_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Default for RetryConfig {
    /// Starts at 100 ms, doubling up to 15 seconds
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Constructs a retry configuration
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// The delay before the retry that follows `failures` earlier failures
    fn delay_after(&self, failures: u32) -> Duration {
        self.multiplier
            .checked_pow(failures)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// What to do after a refresh failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once the delay has passed
    RetryAfter(Duration),
    /// The failure is permanent
    GiveUp,
}

/// Tracks the consecutive failures of a single refresh loop
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    failures: u32,
}

impl RetryState {
    /// Starts with no failures recorded
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Records a successful refresh
    pub fn succeeded(&mut self) {
        self.failures = 0;
    }

    /// Records a failed refresh and decides whether to retry it
    pub fn failed(&mut self, err: &(dyn error::Error + 'static)) -> RetryDecision {
        let cause = find_cause(err);
        if cause.map_or(false, |cause| !cause.is_transient()) {
            return RetryDecision::GiveUp;
        }

        let backoff = self.config.delay_after(self.failures);
        self.failures = self.failures.saturating_add(1);

        let requested = cause
            .and_then(Error::retrieve_error)
            .and_then(RetrieveError::retry_after);
        RetryDecision::RetryAfter(requested.map_or(backoff, |r| r.max(backoff)))
    }
}

/// Finds the first error of this crate in a chain of sources
fn find_cause<'a>(err: &'a (dyn error::Error + 'static)) -> Option<&'a Error> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(cause) = err.downcast_ref::<Error>() {
            return Some(cause);
        }
        current = err.source();
    }
    None
}
