//! Severity levels and the recency-weighted scoring that drives them.
//!
//! Each signature keeps an exponentially decayed occurrence frequency:
//! every new occurrence first decays the previous value by
//! `0.5^(elapsed / half_life)` and then adds one. Severity is derived from
//! that frequency, the anomaly type and the latency magnitude, and never
//! decreases for the lifetime of a signature.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::AnomalyType;

/// Severity of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Isolated or cheap anomaly.
    Low,
    /// Recurring anomaly.
    Medium,
    /// Frequent or severe anomaly.
    High,
    /// Escalated: burst of occurrences within the escalation window.
    Critical,
}

impl Severity {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the next level, saturating at `High`.
    ///
    /// `Critical` is reserved for escalation and is never reached by bumping.
    #[must_use]
    pub const fn bump(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
            Self::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity scoring parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityPolicy {
    /// Half-life of the decayed occurrence frequency.
    pub half_life: Duration,
    /// Decayed frequency at which a signature becomes `Medium`.
    pub medium_frequency: f64,
    /// Decayed frequency at which a signature becomes `High`.
    pub high_frequency: f64,
    /// Latency over `factor × budget` bumps severity one level.
    pub latency_bump_factor: f64,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            half_life: Duration::from_secs(60),
            medium_frequency: 3.0,
            high_frequency: 10.0,
            latency_bump_factor: 5.0,
        }
    }
}

impl SeverityPolicy {
    /// Sets the decay half-life.
    #[must_use]
    pub const fn with_half_life(mut self, half_life: Duration) -> Self {
        self.half_life = half_life;
        self
    }

    /// Sets the frequency thresholds for `Medium` and `High`.
    #[must_use]
    pub const fn with_frequencies(mut self, medium: f64, high: f64) -> Self {
        self.medium_frequency = medium;
        self.high_frequency = high;
        self
    }

    /// Decays `frequency` observed at `since` to `now` and adds one occurrence.
    #[must_use]
    pub fn decayed(&self, frequency: f64, since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
        let half_life = self.half_life.as_secs_f64();
        let factor = if half_life > 0.0 {
            0.5_f64.powf(elapsed.as_secs_f64() / half_life)
        } else {
            0.0
        };
        frequency.mul_add(factor, 1.0)
    }

    /// Scores one observation. Callers keep the maximum of this and the
    /// current severity.
    #[must_use]
    pub fn score(
        &self,
        anomaly_type: AnomalyType,
        frequency: f64,
        latency_ms: f64,
        latency_budget_ms: f64,
    ) -> Severity {
        let base = match anomaly_type {
            AnomalyType::ConnectionError | AnomalyType::Timeout => Severity::Medium,
            _ => Severity::Low,
        };
        let by_frequency = if frequency >= self.high_frequency {
            Severity::High
        } else if frequency >= self.medium_frequency {
            Severity::Medium
        } else {
            Severity::Low
        };
        let level = base.max(by_frequency);
        if latency_budget_ms > 0.0 && latency_ms >= latency_budget_ms * self.latency_bump_factor {
            level.bump()
        } else {
            level
        }
    }
}
