//! Traffic generation error types.

use std::time::Duration;

use streamprobe_core::{CoreError, ErrorCategory, ErrorDetail};

/// Result type alias for generator operations.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Generator-internal errors. These fail a run before any Event is recorded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Scenario is invalid.
    #[error("invalid scenario: {0}")]
    Scenario(String),

    /// Endpoint could not be resolved to a socket address.
    #[error("cannot resolve endpoint {endpoint}: {message}")]
    Resolve {
        /// Configured endpoint.
        endpoint: String,
        /// Resolver message.
        message: String,
    },

    /// Payload mix cannot be sampled.
    #[error("invalid payload mix: {0}")]
    PayloadMix(String),

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error outside of a session (e.g. binding a local endpoint).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Creates a resolve error.
    #[must_use]
    pub fn resolve(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// Per-operation transport failure. Always recorded as an Event, never
/// raised to the caller of the generator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connection refused by the endpoint.
    #[error("connection refused: {0}")]
    Refused(String),

    /// Connection reset or aborted by the peer.
    #[error("connection reset: {0}")]
    Reset(String),

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Operation exceeded its timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation name (connect, send, recv).
        operation: &'static str,
        /// Configured timeout.
        after: Duration,
    },

    /// Reply could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer sent a line longer than the frame limit.
    #[error("protocol error: line exceeds {0} bytes")]
    Oversized(u64),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Returns the normalized Event category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Refused(_) | Self::Reset(_) | Self::Closed | Self::Io(_) => {
                ErrorCategory::Connection
            }
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Protocol(_) | Self::Oversized(_) => ErrorCategory::Protocol,
        }
    }

    /// Returns true if the connection is unusable afterwards.
    #[must_use]
    pub const fn breaks_connection(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }

    /// Converts into an Event error detail.
    #[must_use]
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.category(), self.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::Refused(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => Self::Reset(err.to_string()),
            ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(err.to_string()),
        }
    }
}
