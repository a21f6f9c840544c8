//! Error types for the harness.
//!
//! Only lifecycle failures surface here. A run that fails (invalid scenario,
//! unreachable endpoint, too many failed sessions) is reported through
//! [`RunOutput`](crate::harness::RunOutput) with `status = failed`, not as an
//! error.

use streamprobe_core::CoreError;
use streamprobe_detect::DetectError;
use streamprobe_load::LoadError;
use streamprobe_remedy::RemedyError;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Run registry, recorder or sink failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Traffic generator failure.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Anomaly store failure.
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// Suggestion store failure.
    #[error(transparent)]
    Remedy(#[from] RemedyError),

    /// A run task panicked or was cancelled.
    #[error("run task failed: {0}")]
    Task(String),
}

impl HarnessError {
    /// Creates a task error.
    #[must_use]
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }
}
