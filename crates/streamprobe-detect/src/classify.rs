//! Event classification into anomaly types.

use serde::{Deserialize, Serialize};
use streamprobe_core::{ErrorCategory, Event, Outcome};

/// Kind of anomaly an Event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    /// Successful reply slower than the run's latency budget.
    HighLatency,
    /// Connect refused, reset or closed by peer.
    ConnectionError,
    /// Malformed or unexpected reply.
    ProtocolError,
    /// Reply violated shape or latency rules.
    ValidationFailure,
    /// Reply for a sequence already seen.
    DuplicateDetected,
    /// Operation timed out.
    Timeout,
}

impl AnomalyType {
    /// All anomaly types.
    pub const ALL: [Self; 6] = [
        Self::HighLatency,
        Self::ConnectionError,
        Self::ProtocolError,
        Self::ValidationFailure,
        Self::DuplicateDetected,
        Self::Timeout,
    ];

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HighLatency => "HIGH_LATENCY",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::DuplicateDetected => "DUPLICATE_DETECTED",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Returns true if the latency of the event distinguishes signatures.
    #[must_use]
    pub const fn is_latency_sensitive(&self) -> bool {
        matches!(self, Self::HighLatency | Self::Timeout)
    }

    const fn from_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Connection => Self::ConnectionError,
            ErrorCategory::Protocol => Self::ProtocolError,
            ErrorCategory::Validation => Self::ValidationFailure,
            ErrorCategory::Duplicate => Self::DuplicateDetected,
            ErrorCategory::Timeout => Self::Timeout,
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an event. Returns `None` for events within the latency budget.
///
/// An error event without detail is treated as a protocol error.
#[must_use]
pub fn classify(event: &Event, latency_budget_ms: f64) -> Option<AnomalyType> {
    match event.outcome {
        Outcome::Timeout => Some(AnomalyType::Timeout),
        Outcome::Error => Some(
            event
                .category()
                .map_or(AnomalyType::ProtocolError, AnomalyType::from_category),
        ),
        Outcome::Success if event.latency_ms > latency_budget_ms => Some(AnomalyType::HighLatency),
        Outcome::Success => None,
    }
}
