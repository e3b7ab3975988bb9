//! Shared idle countdown.

use std::time::Duration;

/// A single countdown shared by every connection.
///
/// Each loop cycle subtracts its measured duration; when nothing is left the
/// budget reports exhaustion once and refills to the full interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleBudget {
    interval: Duration,
    remaining: Duration,
}

impl IdleBudget {
    /// A full budget of `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            remaining: interval,
        }
    }

    /// Time left before the next idle notification.
    #[must_use]
    pub const fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Subtract `elapsed`. Returns `true` and refills when the budget runs out.
    pub fn consume(&mut self, elapsed: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(elapsed);
        if self.remaining.is_zero() {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Refill to the full interval.
    pub fn reset(&mut self) {
        self.remaining = self.interval;
    }
}
