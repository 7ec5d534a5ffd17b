//! Utilities for adding a bit of jitter to reduce stampeding

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::clock::{DurationSecs, UnixTime};

/// A type that provides some jittering of time
pub trait JitterSource {
    /// Jitters a given input time
    fn jitter(&mut self, time: UnixTime) -> UnixTime;
}

/// A jitter source that does not do any jittering of time
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        time
    }
}

/// Jitters a value earlier by a random amount
///
/// Times jittered by this type will have a value with a uniform distribution
/// in the interval `(time - max_jitter, time]`.
#[derive(Debug)]
pub struct RandomEarlyJitter<R = StdRng> {
    max_jitter: DurationSecs,
    rng: R,
}

impl RandomEarlyJitter {
    /// Jitters times earlier by up to `max_jitter`
    pub fn new(max_jitter: DurationSecs) -> Self {
        Self::with_rng(max_jitter, StdRng::from_entropy())
    }
}

impl<R> RandomEarlyJitter<R> {
    /// Jitters times using the given random number generator
    pub fn with_rng(max_jitter: DurationSecs, rng: R) -> Self {
        Self { max_jitter, rng }
    }
}

impl<R: Rng> JitterSource for RandomEarlyJitter<R> {
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        if self.max_jitter.0 == 0 {
            return time;
        }
        time - DurationSecs(self.rng.gen_range(0..self.max_jitter.0))
    }
}
