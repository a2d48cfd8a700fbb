//! Time source abstraction for real and simulated time.
//!
//! The reactor orders alarms by a monotonic [`Instant`] while the light
//! scheduler compares against local wall-clock time. Both are read through
//! [`TimeSource`] so tests can step time forward by hand instead of sleeping.

use chrono::{DateTime, Local};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Trait for abstracting time reads.
pub trait TimeSource {
    /// Monotonic time used for alarm deadlines.
    fn now(&self) -> Instant;

    /// Local wall-clock time used for sunrise/sunset decisions.
    fn local_now(&self) -> DateTime<Local>;

    /// Whether this source is driven by hand.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Real-time implementation backed by the system clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Simulated time source that only moves when [`advance`](Self::advance) is called.
///
/// Both clocks move together, so an alarm due in ten minutes and a wall-clock
/// check ten minutes later agree.
#[derive(Debug)]
pub struct SimulatedTimeSource {
    base_instant: Instant,
    base_local: DateTime<Local>,
    elapsed: Cell<Duration>,
}

impl SimulatedTimeSource {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_local: start,
            elapsed: Cell::new(Duration::ZERO),
        }
    }

    /// Start at the current local time.
    pub fn starting_now() -> Self {
        Self::new(Local::now())
    }

    /// Move both clocks forward.
    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl TimeSource for SimulatedTimeSource {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed.get()
    }

    fn local_now(&self) -> DateTime<Local> {
        chrono::Duration::from_std(self.elapsed.get())
            .ok()
            .and_then(|elapsed| self.base_local.checked_add_signed(elapsed))
            .unwrap_or(self.base_local)
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
