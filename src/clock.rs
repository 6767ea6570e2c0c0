//! Clock utilities
//!
//! A monotonic timebase for cadence decisions and the wall-clock epoch
//! source used by recording-timestamp injection.

use std::time::Instant;

/// Monotonic clock reporting seconds since its creation.
#[derive(Debug)]
pub struct Timebase {
    epoch: Instant,
}

impl Timebase {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds elapsed since this timebase was created.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_millis_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}
