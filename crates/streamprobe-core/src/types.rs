//! Core types shared by every stage of the pipeline.
//!
//! Identifiers are UUID newtypes so records stay addressable across process
//! restarts and external stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of one Run.
    RunId
);
uuid_id!(
    /// Identifier of one recorded Event.
    EventId
);
uuid_id!(
    /// Identifier of an anomaly Signature.
    SignatureId
);
uuid_id!(
    /// Identifier of an anomaly Occurrence.
    OccurrenceId
);
uuid_id!(
    /// Identifier of a FixSuggestion.
    SuggestionId
);

/// Streaming protocol exercised by a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Persistent bidirectional line-framed stream.
    #[serde(rename = "SOCKET_STREAM", alias = "socket_stream")]
    SocketStream,
    /// Publish/subscribe broker.
    #[serde(rename = "PUBSUB", alias = "pubsub")]
    PubSub,
}

impl Protocol {
    /// Returns the canonical wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SocketStream => "SOCKET_STREAM",
            Self::PubSub => "PUBSUB",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one simulated protocol interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reply received and accepted.
    Success,
    /// Transport, protocol, validation or duplicate failure.
    Error,
    /// An operation exceeded its timeout.
    Timeout,
}

impl Outcome {
    /// Returns true for outcomes counted in the error rate.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

/// Normalized failure category carried by non-success Events.
///
/// Transport categories (`Connection`, `Protocol`, `Timeout`) are kept apart
/// from `Validation` so downstream classification can tell "endpoint down"
/// from "endpoint slow or incorrect".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connect refused, reset or closed by peer.
    Connection,
    /// Malformed or unexpected reply.
    Protocol,
    /// Reply violated shape or latency rules.
    Validation,
    /// Reply for a sequence already seen on the session.
    Duplicate,
    /// Operation timed out.
    Timeout,
}

impl ErrorCategory {
    /// Returns the snake_case name used in fingerprints.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::Validation => "validation",
            Self::Duplicate => "duplicate",
            Self::Timeout => "timeout",
        }
    }

    /// Returns true for transport-level categories.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Connection | Self::Protocol | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail attached to a failed Event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Normalized category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
}

impl ErrorDetail {
    /// Creates a new error detail.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

/// Atomic outcome record of one simulated protocol interaction.
///
/// Events are write-once: there are no mutating methods, and sinks only
/// append them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Index of the emitting session within the run.
    pub session: u32,
    /// Per-session sequence number, strictly increasing.
    pub sequence: u64,
    /// Wall-clock time the interaction completed.
    pub timestamp: DateTime<Utc>,
    /// Protocol of the emitting scenario.
    pub protocol: Protocol,
    /// Target endpoint.
    pub endpoint: String,
    /// Outcome.
    pub outcome: Outcome,
    /// Measured latency in milliseconds.
    pub latency_ms: f64,
    /// Payload kind drawn from the weighted mix.
    pub payload_kind: String,
    /// Failure detail for non-success outcomes.
    pub error: Option<ErrorDetail>,
}

impl Event {
    /// Returns a builder for an event of the given run and session.
    #[must_use]
    pub fn builder(run_id: RunId, session: u32, sequence: u64) -> EventBuilder {
        EventBuilder::new(run_id, session, sequence)
    }

    /// Returns the error category, if any.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(|e| e.category)
    }
}

/// Builder for [`Event`].
#[derive(Debug)]
pub struct EventBuilder {
    run_id: RunId,
    session: u32,
    sequence: u64,
    timestamp: Option<DateTime<Utc>>,
    protocol: Protocol,
    endpoint: String,
    payload_kind: String,
}

impl EventBuilder {
    fn new(run_id: RunId, session: u32, sequence: u64) -> Self {
        Self {
            run_id,
            session,
            sequence,
            timestamp: None,
            protocol: Protocol::SocketStream,
            endpoint: String::new(),
            payload_kind: String::new(),
        }
    }

    /// Sets the protocol and endpoint.
    #[must_use]
    pub fn target(mut self, protocol: Protocol, endpoint: impl Into<String>) -> Self {
        self.protocol = protocol;
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the payload kind.
    #[must_use]
    pub fn payload_kind(mut self, kind: impl Into<String>) -> Self {
        self.payload_kind = kind.into();
        self
    }

    /// Overrides the completion timestamp (defaults to now).
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Finishes a successful event.
    #[must_use]
    pub fn success(self, latency_ms: f64) -> Event {
        self.finish(Outcome::Success, latency_ms, None)
    }

    /// Finishes a failed event.
    #[must_use]
    pub fn failure(self, latency_ms: f64, detail: ErrorDetail) -> Event {
        let outcome = if detail.category == ErrorCategory::Timeout {
            Outcome::Timeout
        } else {
            Outcome::Error
        };
        self.finish(outcome, latency_ms, Some(detail))
    }

    fn finish(self, outcome: Outcome, latency_ms: f64, error: Option<ErrorDetail>) -> Event {
        Event {
            id: EventId::new(),
            run_id: self.run_id,
            session: self.session,
            sequence: self.sequence,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            protocol: self.protocol,
            endpoint: self.endpoint,
            outcome,
            latency_ms,
            payload_kind: self.payload_kind,
            error,
        }
    }
}
