//! Time sources for the timer queue.
//!
//! Times are offsets from the moment the clock was created.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Provides the current time to the event loop and waits for deadlines.
pub trait Clock {
    /// Time elapsed since the clock started.
    fn now(&self) -> Duration;

    /// Blocks (or jumps) until `now() >= deadline`.
    fn wait_until(&self, deadline: Duration);
}

/// Wall-clock time backed by [`Instant`].
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Creates a clock starting now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn wait_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual time that only moves when the loop waits for a deadline.
///
/// Timer-heavy code runs instantly and deterministically under this clock.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<Duration>,
}

impl VirtualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn wait_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}
