//! Falsification Tests: Category B - Anomaly Detection (F020-F039)

use std::sync::Arc;
use std::time::Duration;

use streamprobe::core::{ErrorCategory, ErrorDetail};
use streamprobe::detect::{
    AnomalyDetector, AnomalyStore, EscalationConfig, FIXED_BUCKET, InMemoryAnomalyStore,
};
use streamprobe::prelude::*;

fn churn(endpoint: &str, secs: f64, connections: u32, mps: f64) -> Scenario {
    let mut scenario = Scenario::new(Protocol::SocketStream, endpoint, secs, connections)
        .with_rate(RateProfile::steady(mps))
        .with_seed(11);
    scenario.session.reconnect_per_message = true;
    scenario.session.operation_timeout = Duration::from_secs(2);
    scenario
}

fn refused(run: RunId, session: u32, sequence: u64) -> Event {
    Event::builder(run, session, sequence)
        .target(Protocol::SocketStream, "10.0.0.1:7000")
        .failure(0.4, ErrorDetail::new(ErrorCategory::Connection, "connection refused"))
}

// =============================================================================
// F020-F024: Connection Churn Against a Rejecting Endpoint
// =============================================================================

/// F020: Rejecting half of all connections yields error_rate ≈ 0.5 and one
/// CONNECTION_ERROR signature whose count matches the error events
///
/// # Falsification Attempt
/// Open a fresh connection per message against an endpoint that drops every
/// second connection; an error rate far from 0.5, a missing signature or a
/// count mismatch falsifies the claim.
#[tokio::test]
async fn f020_rejecting_endpoint_yields_connection_signature() {
    let endpoint = endpoints::flaky_echo("127.0.0.1:0", 2).await.unwrap();
    let harness = Harness::in_memory();

    let output = harness
        .run(churn(&endpoint.endpoint(), 1.0, 2, 20.0))
        .await
        .unwrap();

    let m = &output.metrics;
    assert!(m.total_events >= 10, "F020 FALSIFIED: only {} events", m.total_events);
    assert!(
        (0.35..=0.65).contains(&m.error_rate),
        "F020 FALSIFIED: error_rate {} not near 0.5",
        m.error_rate
    );

    let connection: Vec<&Signature> = output.signatures_of(AnomalyType::ConnectionError).collect();
    assert_eq!(
        connection.len(),
        1,
        "F020 FALSIFIED: expected one CONNECTION_ERROR signature, got {}",
        connection.len()
    );
    let signature = connection[0];
    assert_eq!(
        signature.occurrence_count, m.error_events,
        "F020 FALSIFIED: occurrence_count {} != error events {}",
        signature.occurrence_count, m.error_events
    );
    assert_eq!(signature.latency_bucket, FIXED_BUCKET);
    assert_eq!(signature.endpoint, endpoint.endpoint());
}

/// F021: Every anomalous Event leaves exactly one Occurrence when debounce is off
///
/// # Falsification Attempt
/// Compare the stored occurrences with the signature's counter and with the
/// number of error events; any difference falsifies the claim.
#[tokio::test]
async fn f021_one_occurrence_per_anomalous_event() {
    let endpoint = endpoints::flaky_echo("127.0.0.1:0", 2).await.unwrap();
    let store = Arc::new(InMemoryAnomalyStore::new());
    let harness = Harness::builder()
        .with_anomaly_store(store.clone())
        .build();

    let output = harness
        .run(churn(&endpoint.endpoint(), 0.5, 1, 20.0))
        .await
        .unwrap();

    let signature = output.signatures.first().expect("F021 FALSIFIED: no signature");
    let occurrences = store.occurrences(signature.id).await.unwrap();
    assert_eq!(
        occurrences.len() as u64,
        signature.occurrence_count,
        "F021 FALSIFIED: stored occurrences disagree with occurrence_count"
    );
    assert!(
        occurrences.iter().all(|o| o.run_id == output.run_id),
        "F021 FALSIFIED: occurrence attributed to another run"
    );
    assert_eq!(occurrences.len() as u64, output.metrics.error_events);
}

/// F022: Identical fingerprints recorded concurrently create one Signature
///
/// # Falsification Attempt
/// Detect 16 × 10 identical connection failures from parallel tasks; more
/// than one Signature or a lost occurrence falsifies the claim.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn f022_concurrent_fingerprints_share_one_signature() {
    let store = Arc::new(InMemoryAnomalyStore::new());
    let detector = Arc::new(AnomalyDetector::new(store.clone(), DetectorConfig::default()));
    let run = RunId::new();

    let mut tasks = Vec::new();
    for session in 0..16 {
        let detector = Arc::clone(&detector);
        tasks.push(tokio::spawn(async move {
            for sequence in 0..10 {
                detector.detect(&refused(run, session, sequence)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let signatures = store.signatures().await.unwrap();
    assert_eq!(
        signatures.len(),
        1,
        "F022 FALSIFIED: {} signatures for one fingerprint",
        signatures.len()
    );
    assert_eq!(signatures[0].occurrence_count, 160, "F022 FALSIFIED: lost occurrences");
    assert_eq!(detector.stats().signatures_created, 1);
}

/// F023: Replies slower than the scenario budget become HIGH_LATENCY
///
/// # Falsification Attempt
/// Delay every reply by 150ms against a 50ms budget; no HIGH_LATENCY
/// signature, or a connection signature, falsifies the claim.
#[tokio::test]
async fn f023_slow_replies_are_high_latency() {
    let endpoint = endpoints::slow_echo("127.0.0.1:0", Duration::from_millis(150))
        .await
        .unwrap();
    let harness = Harness::in_memory();
    let mut scenario = Scenario::new(Protocol::SocketStream, endpoint.endpoint(), 0.6, 1)
        .with_rate(RateProfile::steady(5.0));
    scenario.validation.max_latency_ms = 50;

    let output = harness.run(scenario).await.unwrap();

    assert_eq!(output.metrics.error_events, 0, "F023 FALSIFIED: slow replies counted as errors");
    let slow: Vec<&Signature> = output.signatures_of(AnomalyType::HighLatency).collect();
    assert_eq!(slow.len(), 1, "F023 FALSIFIED: expected one HIGH_LATENCY signature");
    assert_ne!(slow[0].latency_bucket, FIXED_BUCKET);
    assert_eq!(
        output.signatures_of(AnomalyType::ConnectionError).count(),
        0,
        "F023 FALSIFIED: healthy connections flagged"
    );
}

/// F024: Crossing the escalation threshold broadcasts exactly one alert
///
/// # Falsification Attempt
/// Lower the threshold to 3 occurrences and churn against the rejecting
/// endpoint; no alert, or a signature below critical, falsifies the claim.
#[tokio::test]
async fn f024_escalation_alerts_subscribers() {
    let endpoint = endpoints::flaky_echo("127.0.0.1:0", 2).await.unwrap();
    let config = HarnessConfig {
        detector: DetectorConfig::default()
            .with_escalation(EscalationConfig::default().with_threshold(3)),
        ..Default::default()
    };
    let harness = Harness::builder().with_config(config).build();
    let mut alerts = harness.detector().subscribe();

    let output = harness
        .run(churn(&endpoint.endpoint(), 1.0, 1, 20.0))
        .await
        .unwrap();

    let alert = alerts.try_recv().expect("F024 FALSIFIED: no alert broadcast");
    assert_eq!(alert.anomaly_type, AnomalyType::ConnectionError);
    assert_eq!(alert.occurrences_in_window, 4);
    assert!(alerts.try_recv().is_err(), "F024 FALSIFIED: alert repeated");

    let signature = output.signatures.first().unwrap();
    assert_eq!(signature.id, alert.signature_id);
    assert_eq!(signature.severity, Severity::Critical, "F024 FALSIFIED: not escalated");
}

// =============================================================================
// F025-F029: Anomaly Types End to End
// =============================================================================

/// F025: A silent endpoint yields timeout Events and one TIMEOUT signature
///
/// # Falsification Attempt
/// Accept connections but never answer, with a 50ms operation timeout; no
/// timeout Events, or a signature of another type, falsifies the claim.
#[tokio::test]
async fn f025_silent_endpoint_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let harness = Harness::in_memory();
    let mut scenario = Scenario::new(Protocol::SocketStream, addr.to_string(), 0.5, 1)
        .with_rate(RateProfile::steady(10.0));
    scenario.session.operation_timeout = Duration::from_millis(50);

    let output = harness.run(scenario).await.unwrap();

    let m = &output.metrics;
    assert!(m.timeout_events >= 1, "F025 FALSIFIED: no timeout events");
    assert_eq!(m.successful_events, 0);
    let events = harness.sink().events(output.run_id).await.unwrap();
    assert!(
        events.iter().all(|e| e.category() == Some(ErrorCategory::Timeout)),
        "F025 FALSIFIED: non-timeout event recorded"
    );

    assert_eq!(output.signatures.len(), 1, "F025 FALSIFIED: {:?}", output.signatures);
    let signature = &output.signatures[0];
    assert_eq!(signature.anomaly_type, AnomalyType::Timeout);
    assert_eq!(signature.occurrence_count, m.timeout_events);
}

/// F026: Injected duplicate frames surface as DUPLICATE_DETECTED
///
/// # Falsification Attempt
/// Re-send the previous frame on every emission after the first; a run
/// without a DUPLICATE_DETECTED signature falsifies the claim.
#[tokio::test]
async fn f026_injected_duplicates_are_detected() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let mut scenario = Scenario::new(Protocol::SocketStream, endpoint.endpoint(), 0.5, 1)
        .with_rate(RateProfile::steady(20.0))
        .with_seed(3);
    scenario.failure_injection.enabled = true;
    scenario.failure_injection.duplicate_probability = 1.0;

    let output = harness.run(scenario).await.unwrap();

    let m = &output.metrics;
    assert!(m.total_events >= 3, "F026 FALSIFIED: only {} events", m.total_events);
    assert_eq!(m.successful_events, 1, "F026 FALSIFIED: duplicates counted as successes");
    let duplicates: Vec<&Signature> = output.signatures_of(AnomalyType::DuplicateDetected).collect();
    assert_eq!(duplicates.len(), 1, "F026 FALSIFIED: no DUPLICATE_DETECTED signature");
    assert_eq!(duplicates[0].occurrence_count, m.error_events);
}

/// F027: Replies that break validation rules become validation Events
///
/// # Falsification Attempt
/// Require a field the echo endpoint never sends; any successful Event or a
/// missing VALIDATION_FAILURE signature falsifies the claim.
#[tokio::test]
async fn f027_validation_rules_flag_replies() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let mut scenario = Scenario::new(Protocol::SocketStream, endpoint.endpoint(), 0.5, 1)
        .with_rate(RateProfile::steady(10.0));
    scenario.validation.validate_responses = true;
    scenario.validation.required_fields = vec!["status".into()];

    let output = harness.run(scenario).await.unwrap();

    assert!(output.metrics.total_events > 0);
    assert_eq!(output.metrics.error_rate, 1.0, "F027 FALSIFIED: invalid replies accepted");
    let events = harness.sink().events(output.run_id).await.unwrap();
    let event = &events[0];
    assert_eq!(event.category(), Some(ErrorCategory::Validation));
    assert!(
        event.error.as_ref().unwrap().message.contains("status"),
        "F027 FALSIFIED: violation does not name the field"
    );
    assert_eq!(output.signatures_of(AnomalyType::ValidationFailure).count(), 1);
}

// =============================================================================
// F030-F032: Debounce and Occurrence Lifecycle
// =============================================================================

/// F030: A debounce window coalesces repeats into one Occurrence
///
/// # Falsification Attempt
/// Detect five identical failures inside a 10s window; more than one
/// occurrence or a lost repeat falsifies the claim.
#[tokio::test]
async fn f030_debounce_coalesces_repeats() {
    let store = Arc::new(InMemoryAnomalyStore::new());
    let detector = AnomalyDetector::new(
        store.clone(),
        DetectorConfig::default().with_debounce(Duration::from_secs(10)),
    );
    let run = RunId::new();
    for sequence in 0..5 {
        detector.detect(&refused(run, 0, sequence)).await.unwrap();
    }

    let signature = store.signatures().await.unwrap().remove(0);
    let occurrences = store.occurrences(signature.id).await.unwrap();
    assert_eq!(occurrences.len(), 1, "F030 FALSIFIED: repeats not coalesced");
    assert_eq!(occurrences[0].repeat_count, 4, "F030 FALSIFIED: repeats lost");
    assert_eq!(signature.occurrence_count, 1);
}

/// F031: Occurrence status only moves forward
///
/// # Falsification Attempt
/// Resolve an occurrence, then try to acknowledge it; success falsifies it.
#[tokio::test]
async fn f031_resolved_occurrence_is_final() {
    let detector = AnomalyDetector::new(
        Arc::new(InMemoryAnomalyStore::new()),
        DetectorConfig::default(),
    );
    let detection = detector
        .detect(&refused(RunId::new(), 0, 0))
        .await
        .unwrap()
        .unwrap();
    let id = detection.recorded.occurrence.id;

    detector.resolve(id).await.unwrap();
    assert!(
        detector.acknowledge(id).await.is_err(),
        "F031 FALSIFIED: resolved occurrence was acknowledged"
    );
}
