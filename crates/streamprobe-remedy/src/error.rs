//! Fix suggestion error types.

use streamprobe_detect::DetectError;

/// Result type alias for remedy operations.
pub type Result<T> = std::result::Result<T, RemedyError>;

/// Fix suggestion errors.
#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    /// Suggestion not found.
    #[error("suggestion not found: {0}")]
    SuggestionNotFound(String),

    /// Status change not allowed.
    #[error("invalid suggestion transition: {from} -> {to}")]
    Transition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Backing store failure.
    #[error("suggestion store error: {0}")]
    Store(String),

    /// Signature lookup failed.
    #[error(transparent)]
    Detect(#[from] DetectError),
}

impl RemedyError {
    /// Creates a store error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
