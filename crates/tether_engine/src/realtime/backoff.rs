//! Reconnect backoff.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential reconnect delay, reset by a successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    failures: u32,
}

impl Backoff {
    /// Creates a backoff at its base delay.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Returns the delay before the next attempt and counts a failed cycle.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for_failures(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failed cycles.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
