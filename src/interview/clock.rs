//! Per-question countdown.

use serde::Serialize;

/// Countdown for the current question, in whole seconds.
///
/// Rebuilt from the question's budget every time a question becomes
/// current. Remaining time never increases and never drops below zero.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Clock {
    budget: u32,
    remaining: u32,
    running: bool,
}

impl Clock {
    /// A stopped clock holding the full `budget`.
    #[must_use]
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            remaining: budget,
            running: false,
        }
    }

    /// Start counting. Returns `false` if already running or expired.
    pub fn start(&mut self) -> bool {
        if self.running || self.remaining == 0 {
            return false;
        }
        self.running = true;
        true
    }

    /// Stop counting without changing the remaining time.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Count down one second.
    ///
    /// Returns `true` exactly once: on the tick that reaches zero. The
    /// clock stops itself at that point.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.running = false;
            return true;
        }
        false
    }

    /// Seconds left.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Budget the clock was built with.
    #[must_use]
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Whether the clock is counting.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the clock has reached zero.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }
}
