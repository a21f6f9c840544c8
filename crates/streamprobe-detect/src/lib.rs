// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # streamprobe-detect
//!
//! Anomaly detection for the streamprobe harness.
//!
//! This crate provides:
//! - **Classification**: maps events to anomaly types against a run's
//!   latency budget
//! - **Fingerprinting**: SHA-256 keys over type, endpoint, latency bucket and
//!   error category
//! - **Signature store**: atomic get-or-create per fingerprint with
//!   occurrence tracking and debounce coalescing
//! - **Severity**: recency-weighted, non-decreasing scoring
//! - **Escalation**: sliding-window critical threshold with broadcast alerts
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamprobe_detect::{AnomalyDetector, DetectorConfig, InMemoryAnomalyStore};
//!
//! let detector = Arc::new(AnomalyDetector::new(
//!     Arc::new(InMemoryAnomalyStore::new()),
//!     DetectorConfig::default(),
//! ));
//! detector.register_run(run_id, 500.0);
//! let queue = Arc::clone(&detector).spawn_queue(rx);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod classify;
pub mod detector;
pub mod error;
pub mod escalation;
pub mod fingerprint;
pub mod severity;
pub mod store;

pub use classify::{AnomalyType, classify};
pub use detector::{AnomalyDetector, Detection, DetectionStats, DetectorConfig};
pub use error::{DetectError, Result};
pub use escalation::{Alert, EscalationConfig, EscalationTracker};
pub use fingerprint::{FIXED_BUCKET, Fingerprint, latency_bucket};
pub use severity::{Severity, SeverityPolicy};
pub use store::{
    AnomalyCandidate, AnomalyStore, InMemoryAnomalyStore, Occurrence, OccurrenceStatus,
    RecordPolicy, Recorded, Signature,
};
