// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # streamprobe-core
//!
//! Shared data model of the streamprobe harness.
//!
//! - [`Scenario`] declarative load-test configuration, validated at load time
//! - [`Run`] and [`RunRegistry`] for the run lifecycle state machine
//! - [`Event`] write-once outcome records of simulated interactions
//! - [`EventRecorder`] batching, non-blocking recorder over an [`EventSink`]
//! - [`aggregate`] and [`check_slo`] for run metrics and SLO evaluation
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamprobe_core::{Protocol, Scenario};
//!
//! let scenario = Scenario::new(Protocol::SocketStream, "127.0.0.1:9000", 30.0, 5);
//! scenario.validate()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod backoff;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod run;
pub mod scenario;
pub mod types;

pub use backoff::BackoffConfig;
pub use error::{CoreError, Result};
pub use metrics::{
    RunMetrics, SloCheck, SloMetric, SloReport, SloThresholds, aggregate, check_slo, percentile,
};
pub use recorder::{
    EventRecorder, EventSink, JsonlEventSink, MemoryEventSink, RecorderConfig, RecorderHandle,
    RecorderReport, RecorderTask,
};
pub use run::{Run, RunRegistry, RunStatus};
pub use scenario::{
    FailureInjection, MAX_CONNECTIONS, PayloadWeight, RateProfile, Scenario, SessionPolicy,
    ValidationRules,
};
pub use types::{
    ErrorCategory, ErrorDetail, Event, EventBuilder, EventId, OccurrenceId, Outcome, Protocol,
    RunId, SignatureId, SuggestionId,
};
