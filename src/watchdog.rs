//! Main-loop deadline supervision.
//!
//! The board's independent watchdog resets the MCU when the main loop stops
//! feeding it. On the host there is nothing to reset, so an overrun is
//! counted and reported instead.

use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    last_feed: Instant,
    overruns: u64,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Instant::now(),
            overruns: 0,
        }
    }

    /// Restart the deadline. Returns the time since the previous feed.
    pub fn feed(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_feed);
        if elapsed > self.timeout {
            self.overruns += 1;
            warn!(
                "Main loop missed the watchdog deadline: {:?} since last feed (timeout {:?})",
                elapsed, self.timeout
            );
        }
        self.last_feed = now;
        elapsed
    }

    pub fn is_overdue(&self) -> bool {
        self.last_feed.elapsed() > self.timeout
    }

    /// Time left before the deadline, zero once overdue
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.last_feed.elapsed())
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
