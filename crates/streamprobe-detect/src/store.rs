//! Signature and occurrence storage.
//!
//! The store is the serialization point of detection: resolving a
//! fingerprint to its signature, recording the occurrence and updating the
//! signature's counters happen under one per-fingerprint lock, so concurrent
//! identical anomalies always converge on a single signature.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use streamprobe_core::{ErrorCategory, EventId, OccurrenceId, Protocol, RunId, SignatureId};

use crate::classify::AnomalyType;
use crate::error::{DetectError, Result};
use crate::fingerprint::{Fingerprint, latency_bucket};
use crate::severity::{Severity, SeverityPolicy};

/// Deduplicated anomaly class, unique per fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature identifier.
    pub id: SignatureId,
    /// Anomaly type.
    pub anomaly_type: AnomalyType,
    /// Fingerprint this signature is keyed by.
    pub fingerprint: Fingerprint,
    /// Endpoint the anomaly was observed against.
    pub endpoint: String,
    /// Protocol of the observing scenario.
    pub protocol: Protocol,
    /// Error category, for failed events.
    pub category: Option<ErrorCategory>,
    /// Coarse latency bucket that fed the fingerprint.
    pub latency_bucket: String,
    /// Current severity. Never decreases.
    pub severity: Severity,
    /// First occurrence time.
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence time.
    pub last_seen: DateTime<Utc>,
    /// Number of (non-coalesced) occurrences.
    pub occurrence_count: u64,
    /// Highest latency observed.
    pub peak_latency_ms: f64,
    /// Exponentially decayed occurrence frequency as of `last_seen`.
    pub frequency: f64,
}

impl Signature {
    fn from_candidate(candidate: &AnomalyCandidate) -> Self {
        Self {
            id: SignatureId::new(),
            anomaly_type: candidate.anomaly_type,
            fingerprint: candidate.fingerprint.clone(),
            endpoint: candidate.endpoint.clone(),
            protocol: candidate.protocol,
            category: candidate.category,
            latency_bucket: latency_bucket(candidate.anomaly_type, candidate.latency_ms).to_string(),
            severity: Severity::Low,
            first_seen: candidate.at,
            last_seen: candidate.at,
            occurrence_count: 0,
            peak_latency_ms: 0.0,
            frequency: 0.0,
        }
    }

    /// Folds one new occurrence into the counters and severity.
    pub fn observe(&mut self, at: DateTime<Utc>, latency_ms: f64, policy: &RecordPolicy) {
        self.frequency = policy.severity.decayed(self.frequency, self.last_seen, at);
        self.occurrence_count += 1;
        self.last_seen = self.last_seen.max(at);
        self.peak_latency_ms = self.peak_latency_ms.max(latency_ms);
        let scored = policy.severity.score(
            self.anomaly_type,
            self.frequency,
            latency_ms,
            policy.latency_budget_ms,
        );
        self.severity = self.severity.max(scored);
    }
}

/// Occurrence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    /// Not yet looked at.
    New,
    /// Seen by an operator.
    Acknowledged,
    /// Closed.
    Resolved,
}

impl OccurrenceStatus {
    /// Returns true if the transition is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Acknowledged | Self::Resolved) | (Self::Acknowledged, Self::Resolved)
        )
    }

    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

/// One detected instance of a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Occurrence identifier.
    pub id: OccurrenceId,
    /// Signature this occurrence belongs to.
    pub signature_id: SignatureId,
    /// Run the triggering event belongs to.
    pub run_id: RunId,
    /// Triggering event.
    pub event_id: EventId,
    /// Endpoint.
    pub endpoint: String,
    /// Latency of the triggering event.
    pub latency_ms: f64,
    /// Error message of the triggering event.
    pub message: Option<String>,
    /// Status.
    pub status: OccurrenceStatus,
    /// Identical anomalies coalesced into this occurrence by debouncing.
    pub repeat_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the latest coalesced repeat.
    pub last_repeat_at: DateTime<Utc>,
}

/// A classified, fingerprinted event about to be recorded.
#[derive(Debug, Clone)]
pub struct AnomalyCandidate {
    /// Anomaly type.
    pub anomaly_type: AnomalyType,
    /// Fingerprint.
    pub fingerprint: Fingerprint,
    /// Run of the event.
    pub run_id: RunId,
    /// Event identifier.
    pub event_id: EventId,
    /// Endpoint.
    pub endpoint: String,
    /// Protocol.
    pub protocol: Protocol,
    /// Error category.
    pub category: Option<ErrorCategory>,
    /// Event latency.
    pub latency_ms: f64,
    /// Error message.
    pub message: Option<String>,
    /// Event timestamp.
    pub at: DateTime<Utc>,
}

/// Parameters applied while recording a candidate.
#[derive(Debug, Clone, Copy)]
pub struct RecordPolicy {
    /// Identical anomalies of the same run within this window coalesce into
    /// the open occurrence. Zero disables coalescing.
    pub debounce: Duration,
    /// Severity scoring.
    pub severity: SeverityPolicy,
    /// Latency budget of the event's run.
    pub latency_budget_ms: f64,
}

/// Result of recording a candidate.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Signature after the update.
    pub signature: Signature,
    /// New or coalesced occurrence.
    pub occurrence: Occurrence,
    /// True if this candidate created the signature.
    pub created: bool,
    /// True if the candidate was coalesced into an open occurrence.
    pub coalesced: bool,
    /// Severity before the update.
    pub previous_severity: Severity,
}

/// Keyed upsert store for signatures and their occurrences.
#[async_trait]
pub trait AnomalyStore: Send + Sync + 'static {
    /// Atomically resolves the candidate's signature (creating it if needed)
    /// and records an occurrence against it.
    async fn record(&self, candidate: AnomalyCandidate, policy: &RecordPolicy) -> Result<Recorded>;

    /// Raises a signature to `Critical`.
    async fn escalate(&self, id: SignatureId) -> Result<Signature>;

    /// Returns a signature by id.
    async fn signature(&self, id: SignatureId) -> Result<Signature>;

    /// Returns the signature keyed by a fingerprint, if any.
    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<Signature>>;

    /// Returns all signatures, most recently seen first.
    async fn signatures(&self) -> Result<Vec<Signature>>;

    /// Returns the signatures a run produced occurrences for, in first-touch order.
    async fn signatures_for_run(&self, run_id: RunId) -> Result<Vec<SignatureId>>;

    /// Returns the occurrences of a signature in creation order.
    async fn occurrences(&self, id: SignatureId) -> Result<Vec<Occurrence>>;

    /// Changes an occurrence's status.
    async fn set_occurrence_status(
        &self,
        id: OccurrenceId,
        status: OccurrenceStatus,
    ) -> Result<Occurrence>;
}

/// In-memory anomaly store.
#[derive(Default)]
pub struct InMemoryAnomalyStore {
    signatures: DashMap<Fingerprint, Signature>,
    by_id: DashMap<SignatureId, Fingerprint>,
    occurrences: DashMap<OccurrenceId, Occurrence>,
    by_signature: DashMap<SignatureId, Vec<OccurrenceId>>,
    open: DashMap<SignatureId, OccurrenceId>,
    runs: DashMap<RunId, (Vec<SignatureId>, HashSet<SignatureId>)>,
}

impl InMemoryAnomalyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of signatures.
    #[must_use]
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Returns the number of occurrences.
    #[must_use]
    pub fn occurrence_count(&self) -> usize {
        self.occurrences.len()
    }

    fn fingerprint_of(&self, id: SignatureId) -> Result<Fingerprint> {
        self.by_id
            .get(&id)
            .map(|fp| fp.value().clone())
            .ok_or_else(|| DetectError::SignatureNotFound(id.to_string()))
    }

    fn try_coalesce(
        &self,
        signature: SignatureId,
        candidate: &AnomalyCandidate,
        debounce: Duration,
    ) -> Option<Occurrence> {
        if debounce.is_zero() {
            return None;
        }
        let open = *self.open.get(&signature)?.value();
        let mut occurrence = self.occurrences.get_mut(&open)?;
        let since = (candidate.at - occurrence.last_repeat_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if occurrence.run_id != candidate.run_id
            || occurrence.status != OccurrenceStatus::New
            || since > debounce
        {
            return None;
        }
        occurrence.repeat_count += 1;
        occurrence.last_repeat_at = occurrence.last_repeat_at.max(candidate.at);
        Some(occurrence.clone())
    }

    fn touch_run(&self, run_id: RunId, signature: SignatureId) {
        let mut entry = self.runs.entry(run_id).or_default();
        let (order, seen) = entry.value_mut();
        if seen.insert(signature) {
            order.push(signature);
        }
    }
}

#[async_trait]
impl AnomalyStore for InMemoryAnomalyStore {
    async fn record(&self, candidate: AnomalyCandidate, policy: &RecordPolicy) -> Result<Recorded> {
        let mut created = false;
        let mut entry = self
            .signatures
            .entry(candidate.fingerprint.clone())
            .or_insert_with(|| {
                created = true;
                Signature::from_candidate(&candidate)
            });
        let signature = entry.value_mut();
        if created {
            self.by_id.insert(signature.id, signature.fingerprint.clone());
        }
        let previous_severity = signature.severity;

        if let Some(occurrence) = self.try_coalesce(signature.id, &candidate, policy.debounce) {
            return Ok(Recorded {
                signature: signature.clone(),
                occurrence,
                created,
                coalesced: true,
                previous_severity,
            });
        }

        let occurrence = Occurrence {
            id: OccurrenceId::new(),
            signature_id: signature.id,
            run_id: candidate.run_id,
            event_id: candidate.event_id,
            endpoint: candidate.endpoint.clone(),
            latency_ms: candidate.latency_ms,
            message: candidate.message.clone(),
            status: OccurrenceStatus::New,
            repeat_count: 0,
            created_at: candidate.at,
            last_repeat_at: candidate.at,
        };
        self.occurrences.insert(occurrence.id, occurrence.clone());
        self.by_signature
            .entry(signature.id)
            .or_default()
            .push(occurrence.id);
        self.open.insert(signature.id, occurrence.id);
        self.touch_run(candidate.run_id, signature.id);
        signature.observe(candidate.at, candidate.latency_ms, policy);

        Ok(Recorded {
            signature: signature.clone(),
            occurrence,
            created,
            coalesced: false,
            previous_severity,
        })
    }

    async fn escalate(&self, id: SignatureId) -> Result<Signature> {
        let fingerprint = self.fingerprint_of(id)?;
        let mut signature = self
            .signatures
            .get_mut(&fingerprint)
            .ok_or_else(|| DetectError::SignatureNotFound(id.to_string()))?;
        signature.severity = Severity::Critical;
        Ok(signature.clone())
    }

    async fn signature(&self, id: SignatureId) -> Result<Signature> {
        let fingerprint = self.fingerprint_of(id)?;
        self.signatures
            .get(&fingerprint)
            .map(|s| s.value().clone())
            .ok_or_else(|| DetectError::SignatureNotFound(id.to_string()))
    }

    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<Signature>> {
        Ok(self.signatures.get(fingerprint).map(|s| s.value().clone()))
    }

    async fn signatures(&self) -> Result<Vec<Signature>> {
        let mut all: Vec<Signature> = self.signatures.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(all)
    }

    async fn signatures_for_run(&self, run_id: RunId) -> Result<Vec<SignatureId>> {
        Ok(self
            .runs
            .get(&run_id)
            .map(|entry| entry.value().0.clone())
            .unwrap_or_default())
    }

    async fn occurrences(&self, id: SignatureId) -> Result<Vec<Occurrence>> {
        if !self.by_id.contains_key(&id) {
            return Err(DetectError::SignatureNotFound(id.to_string()));
        }
        let ids = self
            .by_signature
            .get(&id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|oid| self.occurrences.get(oid).map(|o| o.value().clone()))
            .collect())
    }

    async fn set_occurrence_status(
        &self,
        id: OccurrenceId,
        status: OccurrenceStatus,
    ) -> Result<Occurrence> {
        let mut occurrence = self
            .occurrences
            .get_mut(&id)
            .ok_or_else(|| DetectError::OccurrenceNotFound(id.to_string()))?;
        if !occurrence.status.can_transition_to(status) {
            return Err(DetectError::Transition {
                from: occurrence.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        occurrence.status = status;
        Ok(occurrence.clone())
    }
}
