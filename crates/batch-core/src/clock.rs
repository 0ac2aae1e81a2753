//! Millisecond clock shared by the scheduler and its executor.
//!
//! Timestamps are `f64` milliseconds since the clock's epoch. The epoch is
//! a `tokio::time::Instant`, so paused-time tests advance it deterministically.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock at the current instant.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch.
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    /// The instant corresponding to a clock timestamp. Negative timestamps
    /// map to the epoch.
    pub fn instant_at(&self, ms: f64) -> Instant {
        self.epoch + millis(ms)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}

/// Convert a non-negative millisecond count to a `Duration`.
pub fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}
