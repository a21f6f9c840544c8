//! Falsification Tests: Category C - Fix Suggestions (F040-F059)

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use streamprobe::prelude::*;
use streamprobe::remedy::{InMemorySuggestionStore, SuggestionStore};

fn churn(endpoint: &str) -> Scenario {
    let mut scenario = Scenario::new(Protocol::SocketStream, endpoint, 0.6, 1)
        .with_rate(RateProfile::steady(20.0))
        .with_name("churn");
    scenario.session.reconnect_per_message = true;
    scenario.session.operation_timeout = Duration::from_secs(2);
    scenario
}

// =============================================================================
// F040-F044: Suggestion Generation
// =============================================================================

/// F040: A connection-rejecting endpoint yields a connection-capacity suggestion
///
/// # Falsification Attempt
/// Churn against an endpoint dropping half its connections; no infra
/// suggestion about connection capacity falsifies the claim.
#[tokio::test]
async fn f040_connection_errors_suggest_capacity() {
    let endpoint = endpoints::flaky_echo("127.0.0.1:0", 2).await.unwrap();
    let harness = Harness::in_memory();

    let output = harness.run(churn(&endpoint.endpoint())).await.unwrap();

    let capacity = output
        .suggestions
        .iter()
        .find(|s| s.title.to_lowercase().contains("connection capacity"))
        .expect("F040 FALSIFIED: no connection-capacity suggestion");
    assert_eq!(capacity.fix_type, FixType::Infra);
    assert_eq!(capacity.status, SuggestionStatus::Suggested);
    assert!(!capacity.implementation_steps.is_empty());
    assert!(
        (0.0..=1.0).contains(&capacity.confidence),
        "F040 FALSIFIED: confidence {} out of range",
        capacity.confidence
    );
    assert_eq!(output.suggestion_ids.len(), output.suggestions.len());
    assert!(output.suggestion_failures.is_empty());
}

/// F041: Suggesting twice never duplicates a (signature, fix type) pair
///
/// # Falsification Attempt
/// Run the same failing scenario twice against one harness; new suggestion
/// ids on the second run, or duplicate pairs in the store, falsify it.
#[tokio::test]
async fn f041_rerun_updates_existing_suggestions() {
    let endpoint = endpoints::flaky_echo("127.0.0.1:0", 2).await.unwrap();
    let store = Arc::new(InMemorySuggestionStore::new());
    let harness = Harness::builder()
        .with_suggestion_store(store.clone())
        .build();

    let first = harness.run(churn(&endpoint.endpoint())).await.unwrap();
    let second = harness.run(churn(&endpoint.endpoint())).await.unwrap();

    assert_eq!(
        first.signature_ids, second.signature_ids,
        "F041 FALSIFIED: same failure produced a new signature"
    );
    let a: HashSet<_> = first.suggestion_ids.iter().collect();
    let b: HashSet<_> = second.suggestion_ids.iter().collect();
    assert_eq!(a, b, "F041 FALSIFIED: rerun created new suggestions");

    let all = store.all().await.unwrap();
    let pairs: HashSet<_> = all.iter().map(|s| (s.signature_id, s.fix_type)).collect();
    assert_eq!(pairs.len(), all.len(), "F041 FALSIFIED: duplicate pairs stored");
}

/// F042: Suggestions are never applied without an explicit decision
///
/// # Falsification Attempt
/// Apply one suggestion, rerun, and check the decision survives and feeds
/// the acceptance history; an auto-applied or reset suggestion falsifies it.
#[tokio::test]
async fn f042_decisions_are_explicit_and_sticky() {
    let endpoint = endpoints::flaky_echo("127.0.0.1:0", 2).await.unwrap();
    let harness = Harness::in_memory();

    let first = harness.run(churn(&endpoint.endpoint())).await.unwrap();
    assert!(
        first
            .suggestions
            .iter()
            .all(|s| s.status == SuggestionStatus::Suggested),
        "F042 FALSIFIED: suggestion changed status on its own"
    );

    let chosen = first.suggestions[0].clone();
    harness
        .engine()
        .set_status(chosen.id, SuggestionStatus::Applied)
        .await
        .unwrap();

    let second = harness.run(churn(&endpoint.endpoint())).await.unwrap();
    let refreshed = second
        .suggestions
        .iter()
        .find(|s| s.id == chosen.id)
        .expect("F042 FALSIFIED: applied suggestion vanished");
    assert_eq!(refreshed.status, SuggestionStatus::Applied);

    let history = harness
        .engine()
        .store()
        .history(chosen.anomaly_type, chosen.fix_type)
        .await
        .unwrap();
    assert_eq!(history.accepted, 1, "F042 FALSIFIED: decision not recorded");
}

/// F043: A healthy run produces no suggestions
///
/// # Falsification Attempt
/// Run against a healthy echo endpoint; any suggestion falsifies the claim.
#[tokio::test]
async fn f043_healthy_run_has_no_suggestions() {
    let endpoint = endpoints::echo("127.0.0.1:0").await.unwrap();
    let harness = Harness::in_memory();
    let scenario = Scenario::new(Protocol::SocketStream, endpoint.endpoint(), 0.5, 2)
        .with_rate(RateProfile::steady(10.0));

    let output = harness.run(scenario).await.unwrap();

    assert!(
        output.suggestion_ids.is_empty(),
        "F043 FALSIFIED: {} suggestions for a healthy run",
        output.suggestion_ids.len()
    );
}
