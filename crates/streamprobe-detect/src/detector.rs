//! Anomaly detector: classify, fingerprint, record, score, escalate.
//!
//! Two entry points share one pipeline. [`AnomalyDetector::detect`] runs it
//! inline for a single event and returns errors to the caller;
//! [`AnomalyDetector::spawn_queue`] consumes flushed events off a channel and
//! only logs failures, so detection problems never stall recording.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use streamprobe_core::{Event, OccurrenceId, RunId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::classify::{AnomalyType, classify};
use crate::error::Result;
use crate::escalation::{Alert, EscalationConfig, EscalationTracker};
use crate::fingerprint::Fingerprint;
use crate::severity::SeverityPolicy;
use crate::store::{
    AnomalyCandidate, AnomalyStore, Occurrence, OccurrenceStatus, RecordPolicy, Recorded,
    Signature,
};

/// Detector configuration.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Debounce window for identical anomalies. Zero records every event.
    pub debounce: Duration,
    /// Severity scoring.
    pub severity: SeverityPolicy,
    /// Escalation window and threshold.
    pub escalation: EscalationConfig,
    /// Latency budget for runs that were never registered.
    pub default_latency_budget_ms: f64,
    /// Capacity of the alert broadcast channel.
    pub alert_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::ZERO,
            severity: SeverityPolicy::default(),
            escalation: EscalationConfig::default(),
            default_latency_budget_ms: 1_000.0,
            alert_capacity: 256,
        }
    }
}

impl DetectorConfig {
    /// Sets the debounce window.
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the severity policy.
    #[must_use]
    pub const fn with_severity(mut self, severity: SeverityPolicy) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the escalation parameters.
    #[must_use]
    pub const fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalation = escalation;
        self
    }

    /// Sets the fallback latency budget.
    #[must_use]
    pub const fn with_latency_budget(mut self, budget_ms: f64) -> Self {
        self.default_latency_budget_ms = budget_ms;
        self
    }
}

/// Outcome of running one anomalous event through the pipeline.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Classified type.
    pub anomaly_type: AnomalyType,
    /// Store result.
    pub recorded: Recorded,
    /// Alert raised by this event, if it crossed the escalation threshold.
    pub alert: Option<Alert>,
}

/// Snapshot of detector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionStats {
    /// Events inspected.
    pub events: u64,
    /// Events classified as anomalies.
    pub anomalies: u64,
    /// Signatures created.
    pub signatures_created: u64,
    /// Occurrences recorded.
    pub occurrences: u64,
    /// Anomalies coalesced by debouncing.
    pub coalesced: u64,
    /// Escalation alerts raised.
    pub alerts: u64,
    /// Pipeline failures (logged and skipped).
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events: AtomicU64,
    anomalies: AtomicU64,
    signatures_created: AtomicU64,
    occurrences: AtomicU64,
    coalesced: AtomicU64,
    alerts: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DetectionStats {
        DetectionStats {
            events: self.events.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            signatures_created: self.signatures_created.load(Ordering::Relaxed),
            occurrences: self.occurrences.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Anomaly detector over an [`AnomalyStore`].
pub struct AnomalyDetector {
    store: Arc<dyn AnomalyStore>,
    config: DetectorConfig,
    budgets: DashMap<RunId, f64>,
    escalation: EscalationTracker,
    alerts: broadcast::Sender<Alert>,
    counters: Counters,
}

impl AnomalyDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(store: Arc<dyn AnomalyStore>, config: DetectorConfig) -> Self {
        let (alerts, _) = broadcast::channel(config.alert_capacity.max(1));
        Self {
            store,
            escalation: EscalationTracker::new(config.escalation),
            config,
            budgets: DashMap::new(),
            alerts,
            counters: Counters::default(),
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AnomalyStore> {
        &self.store
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Sets the latency budget used to classify a run's successful events.
    pub fn register_run(&self, run_id: RunId, latency_budget_ms: f64) {
        self.budgets.insert(run_id, latency_budget_ms);
    }

    /// Drops a run's latency budget.
    pub fn forget_run(&self, run_id: RunId) {
        self.budgets.remove(&run_id);
    }

    /// Subscribes to escalation alerts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> DetectionStats {
        self.counters.snapshot()
    }

    fn budget_for(&self, run_id: RunId) -> f64 {
        self.budgets
            .get(&run_id)
            .map_or(self.config.default_latency_budget_ms, |b| *b.value())
    }

    /// Runs one event through the pipeline.
    ///
    /// Returns `Ok(None)` for events that are not anomalies.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn detect(&self, event: &Event) -> Result<Option<Detection>> {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        let budget = self.budget_for(event.run_id);
        let Some(anomaly_type) = classify(event, budget) else {
            return Ok(None);
        };
        self.counters.anomalies.fetch_add(1, Ordering::Relaxed);

        let candidate = AnomalyCandidate {
            anomaly_type,
            fingerprint: Fingerprint::compute(
                anomaly_type,
                &event.endpoint,
                event.latency_ms,
                event.category(),
            ),
            run_id: event.run_id,
            event_id: event.id,
            endpoint: event.endpoint.clone(),
            protocol: event.protocol,
            category: event.category(),
            latency_ms: event.latency_ms,
            message: event.error.as_ref().map(|e| e.message.clone()),
            at: event.timestamp,
        };
        let policy = RecordPolicy {
            debounce: self.config.debounce,
            severity: self.config.severity,
            latency_budget_ms: budget,
        };
        let mut recorded = self.store.record(candidate, &policy).await?;
        let signature = &recorded.signature;

        if recorded.created {
            self.counters.signatures_created.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                run = %event.run_id,
                signature = %signature.id,
                anomaly = %anomaly_type,
                fingerprint = %signature.fingerprint.short(),
                endpoint = %signature.endpoint,
                "new anomaly signature"
            );
        }
        if recorded.coalesced {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(Detection {
                anomaly_type,
                recorded,
                alert: None,
            }));
        }
        self.counters.occurrences.fetch_add(1, Ordering::Relaxed);
        if signature.severity > recorded.previous_severity {
            tracing::debug!(
                signature = %signature.id,
                old = %recorded.previous_severity,
                new = %signature.severity,
                "signature severity raised"
            );
        }

        let mut alert = None;
        if let Some(count) = self.escalation.observe(signature.id, event.timestamp) {
            let escalated = self.store.escalate(signature.id).await?;
            let raised = Alert {
                signature_id: escalated.id,
                fingerprint: escalated.fingerprint.clone(),
                anomaly_type,
                endpoint: escalated.endpoint.clone(),
                occurrences_in_window: count,
                window: self.config.escalation.window,
                raised_at: chrono::Utc::now(),
            };
            tracing::warn!(
                signature = %escalated.id,
                anomaly = %anomaly_type,
                occurrences = count,
                window = ?raised.window,
                "signature escalated to critical"
            );
            self.counters.alerts.fetch_add(1, Ordering::Relaxed);
            // no subscribers is not an error
            let _ = self.alerts.send(raised.clone());
            recorded.signature = escalated;
            alert = Some(raised);
        }

        Ok(Some(Detection {
            anomaly_type,
            recorded,
            alert,
        }))
    }

    /// Consumes events until the channel closes. Pipeline errors are logged
    /// and counted, never propagated.
    pub fn spawn_queue(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Event>,
    ) -> JoinHandle<DetectionStats> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = self.detect(&event).await {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        run = %event.run_id,
                        event = %event.id,
                        error = %e,
                        "anomaly detection failed"
                    );
                }
            }
            let stats = self.stats();
            tracing::debug!(
                events = stats.events,
                anomalies = stats.anomalies,
                errors = stats.errors,
                "detection queue drained"
            );
            stats
        })
    }

    /// Returns the signatures a run produced occurrences for.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn signatures_for_run(&self, run_id: RunId) -> Result<Vec<Signature>> {
        let ids = self.store.signatures_for_run(run_id).await?;
        let mut signatures = Vec::with_capacity(ids.len());
        for id in ids {
            signatures.push(self.store.signature(id).await?);
        }
        Ok(signatures)
    }

    /// Marks an occurrence acknowledged.
    ///
    /// # Errors
    /// Returns an error if the occurrence is unknown or not `new`.
    pub async fn acknowledge(&self, id: OccurrenceId) -> Result<Occurrence> {
        self.store
            .set_occurrence_status(id, OccurrenceStatus::Acknowledged)
            .await
    }

    /// Marks an occurrence resolved.
    ///
    /// # Errors
    /// Returns an error if the occurrence is unknown or already resolved.
    pub async fn resolve(&self, id: OccurrenceId) -> Result<Occurrence> {
        self.store
            .set_occurrence_status(id, OccurrenceStatus::Resolved)
            .await
    }
}
