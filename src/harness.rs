//! End-to-end run orchestration.
//!
//! ```text
//! Scenario → TrafficGenerator → EventRecorder → EventSink
//!                                     │
//!                                     └→ detection queue → AnomalyDetector
//! run end: aggregate + check_slo, signatures of the run → SuggestionEngine
//! ```
//!
//! A run never turns into an `Err` because the system under test misbehaved:
//! invalid scenarios, unreachable endpoints and failed sessions end as
//! `status = failed` with a reason in the [`RunOutput`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use streamprobe_core::{
    EventRecorder, EventSink, MemoryEventSink, RecorderConfig, RecorderReport, RunId,
    RunMetrics, RunRegistry, RunStatus, Scenario, SignatureId, SloReport, SuggestionId,
    check_slo, metrics,
};
use streamprobe_detect::{
    AnomalyDetector, AnomalyStore, DetectionStats, DetectorConfig, InMemoryAnomalyStore,
    Signature,
};
use streamprobe_load::{GeneratorReport, StopHandle, TrafficGenerator};
use streamprobe_remedy::{
    FixSuggestion, InMemorySuggestionStore, RuleTable, SuggestionEngine, SuggestionStore,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{HarnessError, Result};

/// Harness settings shared by every run.
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    /// Recorder batching and flush retry.
    pub recorder: RecorderConfig,
    /// Detector debounce, severity and escalation.
    pub detector: DetectorConfig,
    /// Rate governor tick. `None` keeps the generator default.
    pub tick: Option<Duration>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    /// Run identifier.
    pub run_id: RunId,
    /// Scenario name.
    pub scenario: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Why the run failed.
    pub failure_reason: Option<String>,
    /// Aggregated metrics.
    pub metrics: RunMetrics,
    /// SLO evaluation of the metrics.
    pub slo: SloReport,
    /// Generator report. Absent when the run failed before generation.
    pub generator: Option<GeneratorReport>,
    /// Recorder report.
    pub recorder: RecorderReport,
    /// Detector counters at the end of the run (cumulative per harness).
    pub detection: DetectionStats,
    /// Signatures the run produced occurrences for.
    pub signature_ids: Vec<SignatureId>,
    /// Snapshot of those signatures.
    pub signatures: Vec<Signature>,
    /// Suggestions created or updated for the run's signatures.
    pub suggestion_ids: Vec<SuggestionId>,
    /// Snapshot of those suggestions.
    pub suggestions: Vec<FixSuggestion>,
    /// Signatures whose suggestion step failed.
    pub suggestion_failures: Vec<(SignatureId, String)>,
}

impl RunOutput {
    /// Returns the signatures of one anomaly type.
    pub fn signatures_of(
        &self,
        anomaly_type: streamprobe_detect::AnomalyType,
    ) -> impl Iterator<Item = &Signature> {
        self.signatures
            .iter()
            .filter(move |s| s.anomaly_type == anomaly_type)
    }
}

/// Handle to a run started with [`Harness::start`].
pub struct RunHandle {
    run_id: RunId,
    stop: StopHandle,
    task: JoinHandle<Result<RunOutput>>,
}

impl RunHandle {
    /// Returns the run id.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Requests a graceful stop. Data recorded so far stays aggregable.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Returns a cloneable stop handle (e.g. for a signal handler).
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    /// Returns an error if the run task panicked or a store failed.
    pub async fn wait(self) -> Result<RunOutput> {
        self.task
            .await
            .map_err(|e| HarnessError::task(e.to_string()))?
    }
}

/// Wires generator, recorder, detector and suggestion engine together.
#[derive(Clone)]
pub struct Harness {
    registry: Arc<RunRegistry>,
    sink: Arc<dyn EventSink>,
    detector: Arc<AnomalyDetector>,
    engine: Arc<SuggestionEngine>,
    config: HarnessConfig,
}

impl Harness {
    /// Creates a harness builder.
    #[must_use]
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Creates a harness backed entirely by in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    /// Returns the run registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Returns the event sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Returns the anomaly detector.
    #[must_use]
    pub fn detector(&self) -> &Arc<AnomalyDetector> {
        &self.detector
    }

    /// Returns the suggestion engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<SuggestionEngine> {
        &self.engine
    }

    /// Starts a run in the background.
    ///
    /// The run is registered before this returns, so its id and stop handle
    /// are usable immediately.
    ///
    /// # Errors
    /// Returns an error only if the registry rejects the run.
    pub async fn start(&self, scenario: Scenario) -> Result<RunHandle> {
        let scenario = Arc::new(scenario);
        let run_id = self.registry.register(Arc::clone(&scenario)).await;
        self.detector
            .register_run(run_id, scenario.validation.max_latency_ms as f64);

        let (detect_tx, detect_rx) = mpsc::unbounded_channel();
        let queue = Arc::clone(&self.detector).spawn_queue(detect_rx);
        let (recorder, recorder_task) =
            EventRecorder::new(Arc::clone(&self.sink), self.config.recorder.clone())
                .forward_to(detect_tx)
                .spawn();

        let mut generator = TrafficGenerator::new(run_id, Arc::clone(&scenario), recorder);
        if let Some(tick) = self.config.tick {
            generator = generator.with_tick(tick);
        }
        let stop = generator.stop_handle();

        let pipeline = Pipeline {
            harness: self.clone(),
            run_id,
            scenario,
            generator,
            recorder: recorder_task,
            queue,
        };
        let pipeline = tokio::spawn(pipeline.execute());
        let harness = self.clone();
        let task = tokio::spawn(async move {
            match pipeline.await {
                Ok(result) => result,
                Err(e) => Err(harness.abandon(run_id, &e.to_string()).await),
            }
        });
        Ok(RunHandle { run_id, stop, task })
    }

    /// Runs a scenario to completion.
    ///
    /// # Errors
    /// Returns an error if the run task panicked or a store failed.
    pub async fn run(&self, scenario: Scenario) -> Result<RunOutput> {
        self.start(scenario).await?.wait().await
    }

    /// Re-aggregates a run's metrics from the sink.
    ///
    /// Safe to call at any time, including mid-run; on a finished run it
    /// always yields the same metrics.
    ///
    /// # Errors
    /// Returns an error if the run is unknown or the sink fails.
    pub async fn aggregate(&self, run_id: RunId) -> Result<RunMetrics> {
        let run = self.registry.get(run_id).await?;
        let events = self.sink.events(run_id).await?;
        Ok(metrics::aggregate(&run, &events, Utc::now()))
    }
}

impl Harness {
    /// Settles a run whose pipeline task died: a non-terminal run is marked
    /// failed and its detector state released.
    async fn abandon(&self, run_id: RunId, cause: &str) -> HarnessError {
        tracing::error!(run = %run_id, cause, "run pipeline crashed");
        self.detector.forget_run(run_id);
        match self.registry.status(run_id).await {
            Ok(status) if !status.is_terminal() => {
                if let Err(e) = self
                    .registry
                    .fail(run_id, format!("run pipeline crashed: {cause}"))
                    .await
                {
                    tracing::warn!(run = %run_id, error = %e, "cannot fail crashed run");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(run = %run_id, error = %e, "crashed run vanished"),
        }
        HarnessError::task(cause.to_string())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Builder for [`Harness`]. Unset stores default to in-memory ones.
#[derive(Default)]
pub struct HarnessBuilder {
    config: HarnessConfig,
    sink: Option<Arc<dyn EventSink>>,
    anomalies: Option<Arc<dyn AnomalyStore>>,
    suggestions: Option<Arc<dyn SuggestionStore>>,
    rules: Option<RuleTable>,
}

impl HarnessBuilder {
    /// Sets the harness configuration.
    #[must_use]
    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the anomaly store.
    #[must_use]
    pub fn with_anomaly_store(mut self, store: Arc<dyn AnomalyStore>) -> Self {
        self.anomalies = Some(store);
        self
    }

    /// Sets the suggestion store.
    #[must_use]
    pub fn with_suggestion_store(mut self, store: Arc<dyn SuggestionStore>) -> Self {
        self.suggestions = Some(store);
        self
    }

    /// Replaces the built-in remediation rules.
    #[must_use]
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Builds the harness.
    #[must_use]
    pub fn build(self) -> Harness {
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(MemoryEventSink::new()));
        let anomalies = self
            .anomalies
            .unwrap_or_else(|| Arc::new(InMemoryAnomalyStore::new()));
        let suggestions = self
            .suggestions
            .unwrap_or_else(|| Arc::new(InMemorySuggestionStore::new()));
        let mut engine = SuggestionEngine::new(suggestions);
        if let Some(rules) = self.rules {
            engine = engine.with_rules(rules);
        }
        Harness {
            registry: Arc::new(RunRegistry::new()),
            sink,
            detector: Arc::new(AnomalyDetector::new(anomalies, self.config.detector)),
            engine: Arc::new(engine),
            config: self.config,
        }
    }
}

/// One run's moving parts, consumed by its background task.
struct Pipeline {
    harness: Harness,
    run_id: RunId,
    scenario: Arc<Scenario>,
    generator: TrafficGenerator,
    recorder: streamprobe_core::RecorderTask,
    queue: JoinHandle<DetectionStats>,
}

impl Pipeline {
    async fn execute(self) -> Result<RunOutput> {
        let Self {
            harness,
            run_id,
            scenario,
            generator,
            recorder,
            queue,
        } = self;
        let registry = &harness.registry;

        let generated = match scenario.validate() {
            Err(e) => {
                drop(generator);
                registry.fail(run_id, e.to_string()).await?;
                Err(e.to_string())
            }
            Ok(()) => {
                registry.transition(run_id, RunStatus::Running).await?;
                generator.run().await.map_err(|e| e.to_string())
            }
        };

        // closes the detection queue once the last batch is forwarded
        let recorded = recorder.finish().await;
        if !recorded.unflushed.is_empty() {
            tracing::error!(
                run = %run_id,
                unflushed = recorded.unflushed.len(),
                "events could not be persisted before shutdown"
            );
        }
        let detection = match queue.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(run = %run_id, error = %e, "detection queue crashed");
                harness.detector.stats()
            }
        };

        if !registry.status(run_id).await?.is_terminal() {
            match &generated {
                Ok(report) if report.stopped => {
                    registry.transition(run_id, RunStatus::Stopped).await?;
                }
                Ok(report)
                    if report.failed_fraction() > scenario.session.max_failed_session_fraction =>
                {
                    registry
                        .fail(
                            run_id,
                            format!(
                                "{} of {} sessions failed",
                                report.failed_sessions(),
                                report.sessions.len()
                            ),
                        )
                        .await?;
                }
                Ok(_) => registry.transition(run_id, RunStatus::Completed).await?,
                Err(reason) => registry.fail(run_id, reason.clone()).await?,
            }
        }

        let metrics = harness.aggregate(run_id).await?;
        registry.set_metrics(run_id, metrics.clone()).await?;
        let slo = check_slo(&metrics, &scenario.slo);

        let signatures = match harness.detector.signatures_for_run(run_id).await {
            Ok(signatures) => signatures,
            Err(e) => {
                tracing::warn!(run = %run_id, error = %e, "cannot list run signatures");
                Vec::new()
            }
        };
        let suggested = harness.engine.suggest_all(&signatures).await;
        harness.detector.forget_run(run_id);

        let run = registry.get(run_id).await?;
        let output = RunOutput {
            run_id,
            scenario: scenario.name.clone(),
            status: run.status,
            failure_reason: run.failure_reason,
            metrics,
            slo,
            generator: generated.ok(),
            recorder: recorded,
            detection,
            signature_ids: signatures.iter().map(|s| s.id).collect(),
            suggestion_ids: suggested.ids().collect(),
            signatures,
            suggestions: suggested.suggestions,
            suggestion_failures: suggested.failures,
        };
        tracing::info!(
            run = %run_id,
            status = %output.status,
            events = output.metrics.total_events,
            error_rate = output.metrics.error_rate,
            p95_ms = output.metrics.latency_p95_ms,
            signatures = output.signature_ids.len(),
            suggestions = output.suggestion_ids.len(),
            slo_passed = output.slo.passed,
            "run finished"
        );
        Ok(output)
    }
}
