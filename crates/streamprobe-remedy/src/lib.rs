// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # streamprobe-remedy
//!
//! Fix suggestions for anomaly signatures.
//!
//! This crate provides:
//! - **Rule table**: deterministic rules keyed by anomaly type, optionally
//!   narrowed by protocol and error category
//! - **Confidence**: rule baseline blended with operator acceptance history
//! - **Priority**: severity weight × ln(1 + occurrences) × confidence
//! - **Suggestion store**: one suggestion per (signature, fix type), updated
//!   in place on every rerun
//!
//! Suggestions are never applied automatically; only
//! [`SuggestionEngine::set_status`] moves them out of `suggested`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamprobe_remedy::{InMemorySuggestionStore, SuggestionEngine};
//!
//! let engine = SuggestionEngine::new(Arc::new(InMemorySuggestionStore::new()));
//! let report = engine.suggest_all(&signatures).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod engine;
pub mod error;
pub mod rules;
pub mod store;

pub use engine::{
    EngineConfig, SuggestionEngine, SuggestionReport, priority_score, severity_weight,
    smoothed_confidence,
};
pub use error::{RemedyError, Result};
pub use rules::{FixType, Rule, RuleTable};
pub use store::{
    Acceptance, FixSuggestion, InMemorySuggestionStore, SuggestionDraft, SuggestionStatus,
    SuggestionStore,
};
