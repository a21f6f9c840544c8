//! Traffic generator: realizes a scenario as concurrent virtual sessions.
//!
//! # Phases
//! 1. Resolve the endpoint and build the payload sampler. Failures here are
//!    generator-internal and surface as `Err` before any Event exists.
//! 2. Spawn the rate governor and one task per session.
//! 3. Wait for every session to finish (duration elapsed, stop requested or
//!    retries exhausted) and report per-session outcomes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamprobe_core::{RecorderHandle, RunId, Scenario};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Result;
use crate::governor::{DEFAULT_TICK, RateGovernor};
use crate::payload::PayloadMix;
use crate::session::{Session, SessionContext, SessionReport};
use crate::transport::{Connector, Endpoint, TcpConnector};

/// Requests a graceful stop of a running generator.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Requests a stop. Sessions close their connections and return.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true if a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a generator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorReport {
    /// One report per session, in session order.
    pub sessions: Vec<SessionReport>,
    /// True if the run ended on an explicit stop.
    pub stopped: bool,
    /// Wall-clock time spent generating.
    pub elapsed: Duration,
    /// Seed used for payload draws and failure injection.
    pub seed: u64,
}

impl GeneratorReport {
    /// Returns the number of permanently failed sessions.
    #[must_use]
    pub fn failed_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.permanently_failed).count()
    }

    /// Returns the fraction of permanently failed sessions.
    #[must_use]
    pub fn failed_fraction(&self) -> f64 {
        if self.sessions.is_empty() {
            return 0.0;
        }
        self.failed_sessions() as f64 / self.sessions.len() as f64
    }

    /// Returns the total number of Events the sessions recorded.
    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.sessions.iter().map(|s| s.events).sum()
    }
}

/// Traffic generator for one run.
pub struct TrafficGenerator {
    run_id: RunId,
    scenario: Arc<Scenario>,
    recorder: RecorderHandle,
    connector: Option<Arc<dyn Connector>>,
    tick: Duration,
    stop: Arc<watch::Sender<bool>>,
}

impl TrafficGenerator {
    /// Creates a generator recording into `recorder`.
    #[must_use]
    pub fn new(run_id: RunId, scenario: Arc<Scenario>, recorder: RecorderHandle) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            run_id,
            scenario,
            recorder,
            connector: None,
            tick: DEFAULT_TICK,
            stop: Arc::new(stop),
        }
    }

    /// Replaces the TCP connector (e.g. with an in-process fake).
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the governor tick.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Returns a handle that stops the run.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop),
        }
    }

    /// Runs all sessions to completion.
    ///
    /// # Errors
    /// Returns an error if the scenario is invalid or the endpoint cannot be
    /// resolved. Per-event failures are recorded as Events instead.
    pub async fn run(self) -> Result<GeneratorReport> {
        let scenario = Arc::clone(&self.scenario);
        scenario.validate()?;
        let payloads = Arc::new(PayloadMix::new(&scenario.payload_mix)?);
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::new(Endpoint::resolve(&scenario).await?)),
        };
        let seed = scenario.seed.unwrap_or_else(rand::random);
        let duration = scenario.duration()?;

        tracing::info!(
            run = %self.run_id,
            scenario = %scenario.name,
            protocol = %scenario.protocol,
            endpoint = %scenario.endpoint,
            connections = scenario.connections,
            duration = ?duration,
            messages_per_second = scenario.rate.messages_per_second,
            seed,
            "starting traffic generation"
        );

        let start = Instant::now();
        let (pace, governor) = RateGovernor::new(scenario.rate.clone(), duration)
            .with_tick(self.tick)
            .spawn(self.stop.subscribe());

        let ctx = SessionContext {
            run_id: self.run_id,
            scenario: Arc::clone(&scenario),
            connector,
            recorder: self.recorder.clone(),
            payloads,
            seed,
            tick: self.tick,
        };
        let mut handles = Vec::with_capacity(scenario.connections as usize);
        for index in 0..scenario.connections {
            let session = Session::new(index, ctx.clone());
            handles.push(tokio::spawn(session.run(pace.clone(), self.stop.subscribe())));
        }
        drop(pace);
        drop(ctx);

        let mut sessions = Vec::with_capacity(handles.len());
        for (index, handle) in (0..).zip(handles) {
            match handle.await {
                Ok(report) => sessions.push(report),
                Err(e) => {
                    tracing::error!(run = %self.run_id, session = index, error = %e, "session task crashed");
                    sessions.push(SessionReport::crashed(index));
                }
            }
        }
        if let Err(e) = governor.await {
            tracing::warn!(run = %self.run_id, error = %e, "rate governor crashed");
        }

        let report = GeneratorReport {
            sessions,
            stopped: *self.stop.borrow(),
            elapsed: start.elapsed(),
            seed,
        };
        tracing::info!(
            run = %self.run_id,
            events = report.total_events(),
            failed_sessions = report.failed_sessions(),
            stopped = report.stopped,
            elapsed = ?report.elapsed,
            "traffic generation completed"
        );
        Ok(report)
    }
}
