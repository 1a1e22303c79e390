//! Wall clock used by time-based quality checks.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current wall-clock time in microseconds since the epoch.
pub trait Clock: Send + Sync {
    /// Current time in microseconds since the Unix epoch.
    fn now_micros(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `now_micros`.
    #[must_use]
    pub const fn new(now_micros: i64) -> Self {
        Self {
            now: AtomicI64::new(now_micros),
        }
    }

    /// Move the clock to `now_micros`.
    pub fn set(&self, now_micros: i64) {
        self.now.store(now_micros, Ordering::Release);
    }

    /// Advance the clock by `micros`.
    pub fn advance(&self, micros: i64) {
        self.now.fetch_add(micros, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}
