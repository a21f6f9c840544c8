//! Sliding-window escalation.
//!
//! Each signature keeps the timestamps of its occurrences within the window.
//! Crossing `critical_threshold` raises the signature to critical and emits
//! one [`Alert`]; another alert is only emitted after the count has dropped
//! back to the threshold and crossed it again.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use streamprobe_core::SignatureId;
use streamprobe_core::scenario::humantime_serde;

use crate::classify::AnomalyType;
use crate::fingerprint::Fingerprint;

/// Escalation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    /// Sliding window length.
    pub window: Duration,
    /// Occurrences within the window above which a signature escalates.
    pub critical_threshold: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            critical_threshold: 20,
        }
    }
}

impl EscalationConfig {
    /// Sets the window.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: usize) -> Self {
        self.critical_threshold = threshold;
        self
    }
}

/// Escalation alert broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Escalated signature.
    pub signature_id: SignatureId,
    /// Its fingerprint.
    pub fingerprint: Fingerprint,
    /// Its anomaly type.
    pub anomaly_type: AnomalyType,
    /// Its endpoint.
    pub endpoint: String,
    /// Occurrences within the window at the crossing.
    pub occurrences_in_window: usize,
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Crossing time.
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Window {
    times: VecDeque<DateTime<Utc>>,
    raised: bool,
}

/// Per-signature sliding windows.
#[derive(Debug, Default)]
pub struct EscalationTracker {
    config: EscalationConfig,
    windows: DashMap<SignatureId, Window>,
}

impl EscalationTracker {
    /// Creates a tracker.
    #[must_use]
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Records an occurrence at `at`. Returns the in-window count when this
    /// occurrence crosses the threshold.
    pub fn observe(&self, id: SignatureId, at: DateTime<Utc>) -> Option<usize> {
        let window = chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        let mut entry = self.windows.entry(id).or_default();
        let state = entry.value_mut();

        state.times.push_back(at);
        let newest = state.times.iter().copied().max().unwrap_or(at);
        let cutoff = newest.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        state.times.retain(|t| *t > cutoff);

        let count = state.times.len();
        if count > self.config.critical_threshold {
            if state.raised {
                return None;
            }
            state.raised = true;
            Some(count)
        } else {
            state.raised = false;
            None
        }
    }

    /// Returns the current in-window count of a signature.
    #[must_use]
    pub fn count(&self, id: SignatureId) -> usize {
        self.windows.get(&id).map_or(0, |w| w.times.len())
    }
}
