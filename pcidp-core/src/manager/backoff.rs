//! Delay between failed restart attempts.

use crate::config::Config;
use std::time::Duration;

/// Exponential backoff, doubling per consecutive failure up to a ceiling.
///
/// An initial delay of zero retries immediately every time.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_millis(config.restart_backoff_initial_ms),
            Duration::from_millis(config.restart_backoff_max_ms),
        )
    }

    /// Delay before the next attempt; grows the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
