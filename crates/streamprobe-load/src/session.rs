//! Virtual client session.
//!
//! A session owns one connection (or opens one per emission in churn mode),
//! paces itself against the governor's latest target and records exactly one
//! Event per interaction. Transport failures are recorded, never raised; a
//! session that keeps failing past its retry budget stops on its own without
//! affecting the others.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use streamprobe_core::{
    ErrorCategory, ErrorDetail, Event, EventBuilder, RecorderHandle, RunId, Scenario,
    ValidationRules,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::governor::{Pace, stop_requested};
use crate::injection::{FailureInjector, derive_session_seed};
use crate::payload::PayloadMix;
use crate::transport::{Connector, Frame, Transport, with_timeout};

const PAYLOAD_STREAM: u64 = 1;
const INJECTION_STREAM: u64 = 2;

/// Everything a session needs from its generator.
#[derive(Clone)]
pub struct SessionContext {
    /// Run the session belongs to.
    pub run_id: RunId,
    /// Frozen scenario.
    pub scenario: Arc<Scenario>,
    /// Connection factory.
    pub connector: Arc<dyn Connector>,
    /// Event recorder.
    pub recorder: RecorderHandle,
    /// Payload sampler.
    pub payloads: Arc<PayloadMix>,
    /// Scenario-level seed.
    pub seed: u64,
    /// Upper bound of a single scheduling sleep.
    pub tick: Duration,
}

/// Outcome of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Session index.
    pub session: u32,
    /// Events recorded.
    pub events: u64,
    /// Successful events.
    pub successes: u64,
    /// Error and timeout events.
    pub failures: u64,
    /// Connections established.
    pub connects: u64,
    /// True if the session exhausted its retries.
    pub permanently_failed: bool,
}

impl SessionReport {
    /// Report of a session whose task crashed.
    #[must_use]
    pub fn crashed(session: u32) -> Self {
        Self {
            session,
            permanently_failed: true,
            ..Default::default()
        }
    }
}

/// Checks a reply against validation rules. Returns the violation, if any.
#[must_use]
pub fn validate_reply(
    rules: &ValidationRules,
    sent: &Frame,
    reply: &Value,
    latency_ms: f64,
) -> Option<String> {
    let Some(object) = reply.as_object() else {
        return Some("reply is not an object".to_string());
    };
    if let Some(missing) = rules
        .required_fields
        .iter()
        .find(|field| !object.contains_key(field.as_str()))
    {
        return Some(format!("reply missing field `{missing}`"));
    }
    if rules.expect_echo {
        let echoed = object.get("seq").and_then(Value::as_u64);
        if echoed != Some(sent.seq) {
            return Some(format!(
                "reply sequence {echoed:?} does not echo sent sequence {}",
                sent.seq
            ));
        }
    }
    if latency_ms > rules.max_latency_ms as f64 {
        return Some(format!(
            "latency {latency_ms:.1}ms exceeds budget {}ms",
            rules.max_latency_ms
        ));
    }
    None
}

/// One virtual client.
pub struct Session {
    index: u32,
    ctx: SessionContext,
    injector: FailureInjector,
    rng: StdRng,
    transport: Option<Box<dyn Transport>>,
    next_event: u64,
    next_seq: u64,
    last_frame: Option<Frame>,
    highest_seen: Option<u64>,
    consecutive_failures: u32,
    report: SessionReport,
}

impl Session {
    /// Creates session `index`.
    #[must_use]
    pub fn new(index: u32, ctx: SessionContext) -> Self {
        let injector = FailureInjector::new(
            ctx.scenario.failure_injection.clone(),
            derive_session_seed(ctx.seed, index, INJECTION_STREAM),
        );
        let rng = StdRng::seed_from_u64(derive_session_seed(ctx.seed, index, PAYLOAD_STREAM));
        Self {
            index,
            ctx,
            injector,
            rng,
            transport: None,
            next_event: 0,
            next_seq: 0,
            last_frame: None,
            highest_seen: None,
            consecutive_failures: 0,
            report: SessionReport {
                session: index,
                ..Default::default()
            },
        }
    }

    /// Runs until the governor reports done, `stop` turns true or the
    /// session fails permanently.
    pub async fn run(
        mut self,
        pace: watch::Receiver<Pace>,
        mut stop: watch::Receiver<bool>,
    ) -> SessionReport {
        let tick = self.ctx.tick;
        // The first emission goes out immediately so every session leaves at
        // least one Event behind.
        let mut progress = 1.0_f64;
        let mut last = Instant::now();

        loop {
            let current = *pace.borrow();
            if current.is_done() || *stop.borrow() {
                break;
            }

            let now = Instant::now();
            if let Some(interval) = current.interval {
                progress += now.duration_since(last).as_secs_f64() / interval.as_secs_f64();
            }
            last = now;

            if progress >= 1.0 {
                progress = (progress - 1.0).min(1.0);
                let keep_going = tokio::select! {
                    biased;
                    () = stop_requested(&mut stop) => false,
                    keep = self.emit() => keep,
                };
                if !keep_going {
                    break;
                }
                continue;
            }

            let wait = current
                .interval
                .map_or(tick, |interval| interval.mul_f64(1.0 - progress).min(tick));
            tokio::select! {
                () = stop_requested(&mut stop) => break,
                () = tokio::time::sleep(wait) => {}
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        tracing::debug!(
            run = %self.ctx.run_id,
            session = self.index,
            events = self.report.events,
            failures = self.report.failures,
            permanently_failed = self.report.permanently_failed,
            "session finished"
        );
        self.report
    }

    /// Performs one emission. Returns false once the session has failed
    /// permanently.
    async fn emit(&mut self) -> bool {
        if self.ctx.scenario.session.reconnect_per_message {
            self.emit_churn().await;
            return true;
        }

        if self.transport.is_none() {
            let started = Instant::now();
            match self.ctx.connector.connect(self.index).await {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.report.connects += 1;
                }
                Err(e) => {
                    let event = self.event("connect").failure(elapsed_ms(started), e.detail());
                    self.record(event);
                    return self.back_off().await;
                }
            }
        }

        let injection = self.injector.decide();
        let frame = self.frame(injection.duplicate);
        let timeout = self.ctx.scenario.session.operation_timeout;
        let started = Instant::now();
        if let Some(delay) = injection.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.transport.as_deref_mut() {
            Some(transport) => round_trip(transport, &frame, timeout).await,
            None => return true,
        };
        let latency = elapsed_ms(started);

        match result {
            Ok(reply) => {
                self.consecutive_failures = 0;
                self.judge(&frame, &reply, latency);
                true
            }
            Err(e) => {
                let event = self.event(&frame.kind).failure(latency, e.detail());
                self.record(event);
                if e.breaks_connection() {
                    if let Some(mut transport) = self.transport.take() {
                        transport.close().await;
                    }
                    return self.back_off().await;
                }
                true
            }
        }
    }

    /// Connection churn: connect, exchange once, close.
    async fn emit_churn(&mut self) {
        let injection = self.injector.decide();
        let frame = self.frame(injection.duplicate);
        let timeout = self.ctx.scenario.session.operation_timeout;
        let started = Instant::now();
        if let Some(delay) = injection.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.ctx.connector.connect(self.index).await {
            Ok(mut transport) => {
                self.report.connects += 1;
                let result = round_trip(&mut *transport, &frame, timeout).await;
                transport.close().await;
                result
            }
            Err(e) => Err(e),
        };
        let latency = elapsed_ms(started);

        match result {
            Ok(reply) => self.judge(&frame, &reply, latency),
            Err(e) => {
                let event = self.event(&frame.kind).failure(latency, e.detail());
                self.record(event);
            }
        }
    }

    /// Applies reconnect backoff. Returns false once retries are exhausted.
    async fn back_off(&mut self) -> bool {
        self.consecutive_failures += 1;
        let retry = &self.ctx.scenario.session.retry;
        let attempt = self.consecutive_failures - 1;
        if !retry.allows(attempt) {
            self.report.permanently_failed = true;
            tracing::warn!(
                run = %self.ctx.run_id,
                session = self.index,
                failures = self.consecutive_failures,
                "session failed permanently"
            );
            return false;
        }
        let delay = retry.delay_for(attempt);
        tracing::debug!(session = self.index, attempt = attempt + 1, delay = ?delay, "reconnecting");
        tokio::time::sleep(delay).await;
        true
    }

    fn frame(&mut self, duplicate: bool) -> Frame {
        if duplicate {
            if let Some(previous) = &self.last_frame {
                return previous.clone();
            }
        }
        let (kind, body) = self.ctx.payloads.draw(&mut self.rng);
        let frame = Frame {
            seq: self.next_seq,
            session: self.index,
            kind,
            body,
        };
        self.next_seq += 1;
        self.last_frame = Some(frame.clone());
        frame
    }

    fn judge(&mut self, sent: &Frame, reply: &Value, latency_ms: f64) {
        let builder = self.event(&sent.kind);

        if let Some(seq) = reply.get("seq").and_then(Value::as_u64) {
            if self.highest_seen.is_some_and(|highest| seq <= highest) {
                let detail = ErrorDetail::new(
                    ErrorCategory::Duplicate,
                    format!("reply for sequence {seq} already received"),
                );
                self.record(builder.failure(latency_ms, detail));
                return;
            }
            self.highest_seen = Some(seq);
        }

        let rules = &self.ctx.scenario.validation;
        if rules.validate_responses {
            if let Some(violation) = validate_reply(rules, sent, reply, latency_ms) {
                let detail = ErrorDetail::new(ErrorCategory::Validation, violation);
                self.record(builder.failure(latency_ms, detail));
                return;
            }
        }
        self.record(builder.success(latency_ms));
    }

    fn event(&mut self, payload_kind: &str) -> EventBuilder {
        let sequence = self.next_event;
        self.next_event += 1;
        Event::builder(self.ctx.run_id, self.index, sequence)
            .target(self.ctx.scenario.protocol, self.ctx.scenario.endpoint.clone())
            .payload_kind(payload_kind)
    }

    fn record(&mut self, event: Event) {
        self.report.events += 1;
        if event.outcome.is_failure() {
            self.report.failures += 1;
        } else {
            self.report.successes += 1;
        }
        if let Err(e) = self.ctx.recorder.record(event) {
            tracing::warn!(session = self.index, error = %e, "event dropped, recorder closed");
        }
    }
}

async fn round_trip(
    transport: &mut dyn Transport,
    frame: &Frame,
    timeout: Duration,
) -> Result<Value, TransportError> {
    with_timeout("send", timeout, transport.send(frame)).await?;
    with_timeout("recv", timeout, transport.recv()).await
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
