//! Exponential reconnect backoff
//!
//! No jitter, no retry limit. The delay doubles on every scheduled reconnect
//! and is capped at `max_delay`.

use std::time::Duration;

/// Default delay before the first reconnect attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on the reconnect delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    current_delay: Duration,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            base_delay,
            max_delay,
        }
    }

    /// Delay the next scheduled reconnect will wait
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Take the delay for the reconnect being scheduled and double the stored
    /// value for the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.current_delay = delay.saturating_mul(2).min(self.max_delay);
        delay
    }

    /// Back to the base delay after a successful authorization
    pub fn reset(&mut self) {
        self.current_delay = self.base_delay;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
