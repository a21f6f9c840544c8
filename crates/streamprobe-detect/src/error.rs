//! Detector error types.
//!
//! Detection failures are logged by the detector and never stop event
//! recording, so these errors only reach callers of the explicit query and
//! status APIs.

/// Result type alias for detector operations.
pub type Result<T> = std::result::Result<T, DetectError>;

/// Anomaly detection errors.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Signature not found.
    #[error("signature not found: {0}")]
    SignatureNotFound(String),

    /// Occurrence not found.
    #[error("occurrence not found: {0}")]
    OccurrenceNotFound(String),

    /// Occurrence status change not allowed.
    #[error("invalid occurrence transition: {from} -> {to}")]
    Transition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Backing store failure.
    #[error("anomaly store error: {0}")]
    Store(String),
}

impl DetectError {
    /// Creates a store error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
