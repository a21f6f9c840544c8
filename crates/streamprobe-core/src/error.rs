//! Error types for streamprobe-core.
//!
//! Only generator-internal failures surface as errors. Per-event transport
//! and validation failures are data (Events), never `Err` values.

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error type for scenario, run lifecycle and recording operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Scenario configuration is invalid.
    #[error("invalid scenario: {0}")]
    Scenario(String),

    /// Run not found in the registry.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Requested status transition is not allowed.
    #[error("invalid run transition: {from} -> {to}")]
    Transition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Event sink rejected a write.
    #[error("event sink error: {0}")]
    Sink(String),

    /// Recorder is no longer accepting events.
    #[error("recorder closed")]
    RecorderClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Creates a scenario configuration error.
    #[must_use]
    pub fn scenario(msg: impl Into<String>) -> Self {
        Self::Scenario(msg.into())
    }

    /// Creates an event sink error.
    #[must_use]
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Sink(_) | Self::Io(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
