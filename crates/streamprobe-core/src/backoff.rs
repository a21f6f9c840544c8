//! Exponential backoff shared by session retries and recorder flushes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::scenario::humantime_serde;

/// Backoff configuration for bounded retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay before the first retry.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            max_retries: default_max_retries(),
        }
    }
}

impl BackoffConfig {
    /// Creates a new backoff config with builder pattern.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the max delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the max retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns true if another retry is allowed after `attempts` retries.
    #[must_use]
    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Calculates the delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_secs = self.initial_delay.as_secs_f64();
        #[allow(clippy::cast_possible_wrap)] // attempt is bounded by max_retries
        let exp_secs = base_secs * self.multiplier.powi(attempt as i32);
        let clamped_secs = exp_secs.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(clamped_secs)
    }
}
