// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # streamprobe-load
//!
//! Traffic generation for the streamprobe harness.
//!
//! This crate provides:
//! - **Rate governor**: ramp-up, steady, bounded bursts and ramp-down,
//!   published to sessions over a `watch` channel
//! - **Sessions**: one task per virtual client over `SOCKET_STREAM` or
//!   `PUBSUB` transports, with bounded reconnect backoff
//! - **Failure injection**: seeded delay and duplicate injection
//! - **Reference endpoints**: echo, slow echo, connection-dropping echo and a
//!   pub/sub broker
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamprobe_load::TrafficGenerator;
//!
//! let generator = TrafficGenerator::new(run_id, Arc::new(scenario), recorder);
//! let stop = generator.stop_handle();
//! let report = generator.run().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod endpoints;
pub mod error;
pub mod generator;
pub mod governor;
pub mod injection;
pub mod payload;
pub mod session;
pub mod transport;

pub use endpoints::LocalEndpoint;
pub use error::{LoadError, Result, TransportError};
pub use generator::{GeneratorReport, StopHandle, TrafficGenerator};
pub use governor::{Pace, Phase, RateGovernor, pace_at};
pub use injection::{FailureInjector, Injection};
pub use payload::PayloadMix;
pub use session::{SessionReport, validate_reply};
pub use transport::{Connector, Endpoint, Frame, TcpConnector, Transport};
