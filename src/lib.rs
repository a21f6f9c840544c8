// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! Streamprobe: traffic generation and anomaly detection for streaming
//! endpoints.
//!
//! Drives simulated clients against a socket-stream or pub/sub endpoint,
//! records every interaction as an event, aggregates run metrics, groups
//! anomalous events into signatures and proposes fixes for them.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use streamprobe::prelude::*;
//!
//! # async fn demo() -> streamprobe::Result<()> {
//! let scenario = Scenario::new(Protocol::SocketStream, "127.0.0.1:9000", 10.0, 4)
//!     .with_rate(RateProfile::steady(20.0));
//! let output = Harness::in_memory().run(scenario).await?;
//! println!("{} error_rate={}", output.status, output.metrics.error_rate);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod harness;

pub use error::{HarnessError, Result};
pub use harness::{Harness, HarnessBuilder, HarnessConfig, RunHandle, RunOutput};

pub use streamprobe_core as core;
pub use streamprobe_detect as detect;
pub use streamprobe_load as load;
pub use streamprobe_remedy as remedy;

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::harness::{Harness, HarnessConfig, RunHandle, RunOutput};
    pub use streamprobe_core::{
        Event, Outcome, Protocol, RateProfile, RunId, RunMetrics, RunStatus, Scenario,
        SloReport, SloThresholds,
    };
    pub use streamprobe_detect::{AnomalyType, DetectorConfig, Severity, Signature};
    pub use streamprobe_load::{StopHandle, endpoints};
    pub use streamprobe_remedy::{FixSuggestion, FixType, SuggestionStatus};
}
