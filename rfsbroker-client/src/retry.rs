//! Auto-retry pacing for recoverable operation failures.
//!
//! Session-scoped and per-connection: each supervising loop keeps its own
//! delay, sleeps for [`RetryDelay::next_delay`] before retrying, and calls
//! [`RetryDelay::reset`] once an operation succeeds again.

use std::time::Duration;

const MAX_DELAY_SECS: u64 = 5;

/// Monotonically non-decreasing retry delay: starts at zero, grows by one
/// second per retry, capped at five seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryDelay {
    secs: u64,
}

impl RetryDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay to wait before the upcoming retry, then grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        let current = Duration::from_secs(self.secs);
        if self.secs < MAX_DELAY_SECS {
            self.secs += 1;
        }
        current
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    pub fn reset(&mut self) {
        self.secs = 0;
    }
}
