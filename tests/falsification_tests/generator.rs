//! Falsification Tests: Category A - Traffic Generation and Run Lifecycle (F001-F019)

use std::collections::BTreeSet;
use std::time::Duration;

use streamprobe::core::BackoffConfig;
use streamprobe::prelude::*;

fn steady(endpoint: &str, secs: f64, connections: u32, mps: f64) -> Scenario {
    Scenario::new(Protocol::SocketStream, endpoint, secs, connections)
        .with_rate(RateProfile::steady(mps))
        .with_seed(7)
}

// =============================================================================
// F001-F004: Sessions and Events
// =============================================================================

/// F001: N connections produce exactly N sessions, each with at least one Event
///
/// # Falsification Attempt
/// Run 4 connections against a healthy echo endpoint; if any session is
/// missing or left no Event behind, the claim is falsified.
#[tokio::test]
async fn f001_every_connection_runs_one_session() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();

    let output = harness
        .run(steady(&endpoint.endpoint(), 0.5, 4, 10.0))
        .await
        .unwrap();

    let generator = output.generator.as_ref().unwrap();
    assert_eq!(
        generator.sessions.len(),
        4,
        "F001 FALSIFIED: expected 4 sessions, got {}",
        generator.sessions.len()
    );
    for session in &generator.sessions {
        assert!(
            session.events >= 1,
            "F001 FALSIFIED: session {} recorded no events",
            session.session
        );
    }

    let events = harness.sink().events(output.run_id).await.unwrap();
    let sessions: BTreeSet<u32> = events.iter().map(|e| e.session).collect();
    assert_eq!(
        sessions,
        (0..4).collect::<BTreeSet<u32>>(),
        "F001 FALSIFIED: persisted events do not cover every session"
    );
    assert_eq!(
        events.len() as u64,
        generator.total_events(),
        "F001 FALSIFIED: sessions reported events the sink never stored"
    );
}

/// F002: A healthy echo endpoint yields zero errors and no anomalies
///
/// # Falsification Attempt
/// Validate every reply against a 1s budget; any error event, p95 above the
/// budget, or any Signature falsifies the claim.
#[tokio::test]
async fn f002_healthy_echo_is_clean() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let mut scenario = steady(&endpoint.endpoint(), 1.0, 3, 20.0);
    scenario.validation.validate_responses = true;
    scenario.slo.max_error_rate = Some(0.0);
    scenario.slo.max_p95_latency_ms = Some(scenario.validation.max_latency_ms as f64);

    let output = harness.run(scenario).await.unwrap();

    assert_eq!(output.status, RunStatus::Completed, "F002 FALSIFIED: run did not complete");
    assert!(output.metrics.total_events > 0, "F002 FALSIFIED: no traffic generated");
    assert_eq!(
        output.metrics.error_rate, 0.0,
        "F002 FALSIFIED: error_rate {} on a healthy endpoint",
        output.metrics.error_rate
    );
    assert!(
        output.metrics.latency_p95_ms <= 1000.0,
        "F002 FALSIFIED: p95 {}ms above budget",
        output.metrics.latency_p95_ms
    );
    assert!(
        output.signature_ids.is_empty(),
        "F002 FALSIFIED: healthy run produced {} signatures",
        output.signature_ids.len()
    );
    assert!(output.slo.passed, "F002 FALSIFIED: SLO failed: {:?}", output.slo);
}

/// F003: Ramp-up emits fewer Events than an equally long steady window
///
/// # Falsification Attempt
/// Run the same 1s window twice, once ramping from zero over the whole
/// window; if the ramped run emits as many Events, the claim is falsified.
#[tokio::test]
async fn f003_ramp_up_emits_fewer_events() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();

    let steady_run = harness
        .run(steady(&endpoint.endpoint(), 1.0, 1, 40.0))
        .await
        .unwrap();
    let ramped_run = harness
        .run(
            steady(&endpoint.endpoint(), 1.0, 1, 40.0)
                .with_rate(RateProfile::steady(40.0).with_ramp(1.0, 0.0)),
        )
        .await
        .unwrap();

    assert!(
        ramped_run.metrics.total_events < steady_run.metrics.total_events,
        "F003 FALSIFIED: ramped {} >= steady {}",
        ramped_run.metrics.total_events,
        steady_run.metrics.total_events
    );
}

/// F004: The pub/sub protocol round-trips through a broker
///
/// # Falsification Attempt
/// Publish against the in-process broker; if the run records no Events or
/// does not complete, the claim is falsified.
#[tokio::test]
async fn f004_pubsub_run_completes() {
    let broker = endpoints::broker("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let scenario = Scenario::new(Protocol::PubSub, broker.endpoint(), 0.5, 2)
        .with_rate(RateProfile::steady(10.0))
        .with_name("orders");

    let output = harness.run(scenario).await.unwrap();

    assert_eq!(output.status, RunStatus::Completed, "F004 FALSIFIED: {:?}", output.failure_reason);
    assert!(output.metrics.total_events >= 2, "F004 FALSIFIED: no pub/sub events");
}

/// F005: Bursts driven through the generator raise the emitted volume
///
/// # Falsification Attempt
/// Run 1s at 10 msg/s, once plain and once bursting 5x for half of every
/// 0.5s window; if the bursting run does not clearly emit more, the claim is
/// falsified.
#[tokio::test]
async fn f005_bursts_raise_emitted_volume() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();

    let plain = harness
        .run(steady(&endpoint.endpoint(), 1.0, 1, 10.0))
        .await
        .unwrap();
    let bursting = harness
        .run(
            steady(&endpoint.endpoint(), 1.0, 1, 10.0)
                .with_rate(RateProfile::steady(10.0).with_bursts(5.0, 0.5, 0.25)),
        )
        .await
        .unwrap();

    assert_eq!(bursting.status, RunStatus::Completed);
    assert!(
        bursting.metrics.total_events as f64 > plain.metrics.total_events as f64 * 1.5,
        "F005 FALSIFIED: bursting {} vs plain {}",
        bursting.metrics.total_events,
        plain.metrics.total_events
    );
}

// =============================================================================
// F010-F019: Run Lifecycle
// =============================================================================

/// F010: An invalid scenario fails the run immediately with no Events
///
/// # Falsification Attempt
/// Start a run with zero connections; any recorded Event or a non-failed
/// status falsifies the claim.
#[tokio::test]
async fn f010_invalid_scenario_fails_without_events() {
    let harness = Harness::in_memory();
    let output = harness
        .run(steady("127.0.0.1:9", 1.0, 0, 1.0))
        .await
        .unwrap();

    assert_eq!(output.status, RunStatus::Failed, "F010 FALSIFIED: status {}", output.status);
    let reason = output.failure_reason.unwrap_or_default();
    assert!(
        reason.contains("connections"),
        "F010 FALSIFIED: reason does not name the invalid field: {reason}"
    );
    assert!(
        harness.sink().events(output.run_id).await.unwrap().is_empty(),
        "F010 FALSIFIED: events recorded for an invalid scenario"
    );
}

/// F011: Stop ends the run as stopped and keeps its data aggregable
///
/// # Falsification Attempt
/// Stop a 30s run after 300ms; a status other than stopped, a run that
/// keeps going, or metrics that differ from a re-aggregation falsify it.
#[tokio::test]
async fn f011_stop_yields_stopped_run() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let handle = harness
        .start(steady(&endpoint.endpoint(), 30.0, 2, 20.0))
        .await
        .unwrap();
    let run_id = handle.run_id();

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop();
    let output = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("F011 FALSIFIED: run did not stop within 5s")
        .unwrap();

    assert_eq!(output.status, RunStatus::Stopped, "F011 FALSIFIED: status {}", output.status);
    assert!(output.metrics.total_events > 0, "F011 FALSIFIED: stopped run lost its events");
    let again = harness.aggregate(run_id).await.unwrap();
    assert_eq!(again, output.metrics, "F011 FALSIFIED: re-aggregation differs");
}

/// F012: Re-aggregating a finished run is idempotent
///
/// # Falsification Attempt
/// Aggregate the same finished run three times; any difference falsifies it.
#[tokio::test]
async fn f012_reaggregation_is_idempotent() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let output = harness
        .run(steady(&endpoint.endpoint(), 0.5, 2, 20.0))
        .await
        .unwrap();

    let first = harness.aggregate(output.run_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = harness.aggregate(output.run_id).await.unwrap();

    assert_eq!(first, output.metrics, "F012 FALSIFIED: stored metrics differ");
    assert_eq!(first, second, "F012 FALSIFIED: aggregation drifted over time");
    let run = harness.registry().get(output.run_id).await.unwrap();
    assert_eq!(run.metrics.as_ref(), Some(&first), "F012 FALSIFIED: registry metrics differ");
}

/// F013: Concurrent runs keep their events apart
///
/// # Falsification Attempt
/// Run two scenarios at once against one harness; any event of one run in
/// the other's metrics falsifies the claim.
#[tokio::test]
async fn f013_concurrent_runs_are_isolated() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let a = harness
        .start(steady(&endpoint.endpoint(), 0.5, 1, 10.0))
        .await
        .unwrap();
    let b = harness
        .start(steady(&endpoint.endpoint(), 0.5, 3, 10.0))
        .await
        .unwrap();
    let (a, b) = tokio::join!(a.wait(), b.wait());
    let (a, b) = (a.unwrap(), b.unwrap());

    let a_events = harness.sink().events(a.run_id).await.unwrap();
    assert!(
        a_events.iter().all(|e| e.run_id == a.run_id && e.session == 0),
        "F013 FALSIFIED: run A contains foreign events"
    );
    assert_eq!(
        a.metrics.total_events + b.metrics.total_events,
        a.recorder.flushed + b.recorder.flushed,
        "F013 FALSIFIED: recorded and aggregated totals disagree"
    );
}

/// F014: A run length too large for the clock fails the run with a reason
///
/// # Falsification Attempt
/// Ask for 1e20 seconds; a crashed run task, a run stuck in running or any
/// recorded Event falsifies the claim.
#[tokio::test]
async fn f014_oversized_duration_fails_the_run() {
    let harness = Harness::in_memory();
    let output = harness
        .run(steady("127.0.0.1:9", 1e20, 1, 1.0))
        .await
        .expect("F014 FALSIFIED: run task crashed");

    assert_eq!(output.status, RunStatus::Failed, "F014 FALSIFIED: status {}", output.status);
    let reason = output.failure_reason.unwrap_or_default();
    assert!(reason.contains("duration_seconds"), "F014 FALSIFIED: reason {reason}");
    let status = harness.registry().status(output.run_id).await.unwrap();
    assert!(status.is_terminal(), "F014 FALSIFIED: registry left at {status}");
    assert!(harness.sink().events(output.run_id).await.unwrap().is_empty());
}

/// F015: A vanishingly small rate fails the run with a reason
///
/// # Falsification Attempt
/// Ask for 1e-20 messages per second; a crashed run task or a non-failed
/// status falsifies the claim.
#[tokio::test]
async fn f015_vanishing_rate_fails_the_run() {
    let harness = Harness::in_memory();
    let output = harness
        .run(steady("127.0.0.1:9", 1.0, 1, 1e-20))
        .await
        .expect("F015 FALSIFIED: run task crashed");

    assert_eq!(output.status, RunStatus::Failed, "F015 FALSIFIED: status {}", output.status);
    let reason = output.failure_reason.unwrap_or_default();
    assert!(reason.contains("messages_per_second"), "F015 FALSIFIED: reason {reason}");
}

/// F016: Too many permanently failed sessions fail the run
///
/// # Falsification Attempt
/// Point two sessions without retries at a closed port; a run that ends
/// anything but failed, or without naming the failed sessions, falsifies it.
#[tokio::test]
async fn f016_failed_sessions_fail_the_run() {
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let harness = Harness::in_memory();
    let mut scenario = steady(&closed.to_string(), 0.5, 2, 10.0);
    scenario.session.retry = BackoffConfig::new().with_max_retries(0);
    scenario.session.max_failed_session_fraction = 0.5;

    let output = harness.run(scenario).await.unwrap();

    assert_eq!(output.status, RunStatus::Failed, "F016 FALSIFIED: status {}", output.status);
    assert_eq!(
        output.failure_reason.as_deref(),
        Some("2 of 2 sessions failed"),
        "F016 FALSIFIED: reason does not name the failed sessions"
    );
    let generator = output.generator.as_ref().unwrap();
    assert!(generator.sessions.iter().all(|s| s.permanently_failed));
    assert_eq!(output.signatures_of(AnomalyType::ConnectionError).count(), 1);
}
