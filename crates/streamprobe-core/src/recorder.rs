//! Event recording: append-only sinks and the batching recorder task.
//!
//! Producers call [`RecorderHandle::record`], which never blocks. A single
//! recorder task drains the channel in FIFO order, so per-session ordering
//! is preserved, and appends batches to the sink. A failed flush is retried
//! with backoff; when retries are exhausted the batch stays in memory, an
//! error is logged and the next flush tries again. Events still unflushed at
//! shutdown are forwarded once to the detection queue and returned in the
//! [`RecorderReport`]; the sink never sees them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backoff::BackoffConfig;
use crate::error::{CoreError, Result};
use crate::types::{Event, RunId};

/// Durable append-only event store.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Appends a batch in order. Either the whole batch is stored or an
    /// error is returned.
    async fn append(&self, batch: &[Event]) -> Result<()>;

    /// Returns all stored events of a run in append order.
    async fn events(&self, run: RunId) -> Result<Vec<Event>>;
}

/// In-process event sink.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: parking_lot::RwLock<Vec<Event>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored events across all runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn append(&self, batch: &[Event]) -> Result<()> {
        self.events.write().extend_from_slice(batch);
        Ok(())
    }

    async fn events(&self, run: RunId) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.run_id == run)
            .cloned()
            .collect())
    }
}

/// Append-only JSON-lines file sink.
#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlEventSink {
    /// Creates a sink appending to `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn append(&self, batch: &[Event]) -> Result<()> {
        let mut buf = Vec::with_capacity(batch.len() * 256);
        for event in batch {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    async fn events(&self, run: RunId) -> Result<Vec<Event>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let event: Event = serde_json::from_str(line)?;
            if event.run_id == run {
                events.push(event);
            }
        }
        Ok(events)
    }
}

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Events per batch before an early flush.
    pub batch_size: usize,
    /// Maximum time an event waits in the buffer.
    pub flush_interval: Duration,
    /// Retry policy of a failed flush.
    pub retry: BackoffConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            flush_interval: Duration::from_millis(50),
            retry: BackoffConfig::new()
                .with_initial_delay(Duration::from_millis(20))
                .with_max_delay(Duration::from_secs(1))
                .with_max_retries(3),
        }
    }
}

impl RecorderConfig {
    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the flush retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Cheap, cloneable producer side of the recorder.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl RecorderHandle {
    /// Queues an event for recording. Never blocks.
    ///
    /// # Errors
    /// Returns `CoreError::RecorderClosed` once the recorder has shut down.
    pub fn record(&self, event: Event) -> Result<()> {
        self.tx.send(event).map_err(|_| CoreError::RecorderClosed)
    }
}

/// Outcome of a recorder's lifetime.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RecorderReport {
    /// Events accepted from producers.
    pub received: u64,
    /// Events durably appended.
    pub flushed: u64,
    /// Successful batch appends.
    pub batches: u64,
    /// Flushes that exhausted their retries.
    pub failed_flushes: u64,
    /// Events that could not be appended before shutdown.
    pub unflushed: Vec<Event>,
}

/// Builder and runner of the recorder task.
pub struct EventRecorder {
    sink: Arc<dyn EventSink>,
    config: RecorderConfig,
    forward: Option<mpsc::UnboundedSender<Event>>,
}

impl EventRecorder {
    /// Creates a recorder writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, config: RecorderConfig) -> Self {
        Self {
            sink,
            config,
            forward: None,
        }
    }

    /// Forwards every durably appended event to `tx` (e.g. a detection
    /// queue). Forwarding failures never affect recording.
    #[must_use]
    pub fn forward_to(mut self, tx: mpsc::UnboundedSender<Event>) -> Self {
        self.forward = Some(tx);
        self
    }

    /// Spawns the recorder task.
    #[must_use]
    pub fn spawn(self) -> (RecorderHandle, RecorderTask) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx, shutdown_rx));
        (
            RecorderHandle { tx },
            RecorderTask {
                shutdown: shutdown_tx,
                join,
            },
        )
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RecorderReport {
        let mut report = RecorderReport::default();
        let mut pending: Vec<Event> = Vec::with_capacity(self.config.batch_size);
        let batch_size = self.config.batch_size.max(1);
        let mut flush_at = batch_size;

        let mut ticker = tokio::time::interval(self.config.flush_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(event) = maybe else { break };
                    report.received += 1;
                    pending.push(event);
                    if pending.len() >= flush_at {
                        self.flush(&mut pending, &mut report).await;
                        flush_at = pending.len() + batch_size;
                    }
                }
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        self.flush(&mut pending, &mut report).await;
                        flush_at = pending.len() + batch_size;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        rx.close();
                        while let Some(event) = rx.recv().await {
                            report.received += 1;
                            pending.push(event);
                        }
                        break;
                    }
                }
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending, &mut report).await;
        }
        if !pending.is_empty() {
            tracing::error!(
                unflushed = pending.len(),
                "recorder shut down with unflushed events"
            );
            self.forward_all(&pending);
        }
        report.unflushed = pending;

        tracing::debug!(
            received = report.received,
            flushed = report.flushed,
            batches = report.batches,
            failed_flushes = report.failed_flushes,
            "recorder stopped"
        );
        report
    }

    fn forward_all(&self, events: &[Event]) {
        let Some(ref forward) = self.forward else { return };
        for event in events {
            if forward.send(event.clone()).is_err() {
                tracing::debug!("detection queue closed, forwarding skipped");
                break;
            }
        }
    }

    async fn flush(&self, pending: &mut Vec<Event>, report: &mut RecorderReport) {
        let mut attempt = 0u32;
        loop {
            match self.sink.append(pending).await {
                Ok(()) => {
                    report.flushed += pending.len() as u64;
                    report.batches += 1;
                    self.forward_all(pending);
                    pending.clear();
                    return;
                }
                Err(e) if self.config.retry.allows(attempt) => {
                    let delay = self.config.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        batch = pending.len(),
                        delay = ?delay,
                        error = %e,
                        "event batch flush failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    report.failed_flushes += 1;
                    tracing::error!(
                        batch = pending.len(),
                        error = %e,
                        "event batch flush exhausted retries, holding events in memory"
                    );
                    return;
                }
            }
        }
    }
}

/// Running recorder task.
pub struct RecorderTask {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<RecorderReport>,
}

impl RecorderTask {
    /// Stops accepting events, drains and flushes the buffer, and returns
    /// the report.
    ///
    /// If the final flush fails, the remaining events are still forwarded to
    /// the detection queue but are missing from the sink, so metrics
    /// aggregated from the sink will not count them. They are returned in
    /// [`RecorderReport::unflushed`].
    pub async fn finish(self) -> RecorderReport {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "recorder task panicked");
                RecorderReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, ErrorDetail, Protocol};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event(run: RunId, session: u32, sequence: u64) -> Event {
        Event::builder(run, session, sequence)
            .target(Protocol::SocketStream, "127.0.0.1:1")
            .success(1.0)
    }

    /// Sink that fails the first `failures` appends.
    struct FlakySink {
        inner: MemoryEventSink,
        failures: AtomicU32,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn append(&self, batch: &[Event]) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CoreError::sink("injected failure"));
            }
            self.inner.append(batch).await
        }

        async fn events(&self, run: RunId) -> Result<Vec<Event>> {
            self.inner.events(run).await
        }
    }

    fn fast_retry(max_retries: u32) -> BackoffConfig {
        BackoffConfig::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_max_retries(max_retries)
    }

    #[tokio::test]
    async fn test_memory_sink_filters_by_run() {
        let sink = MemoryEventSink::new();
        let a = RunId::new();
        let b = RunId::new();
        tokio_test::assert_ok!(
            sink.append(&[event(a, 0, 0), event(b, 0, 0), event(a, 0, 1)])
                .await
        );
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events(a).await.unwrap().len(), 2);
        assert_eq!(sink.events(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_sink_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlEventSink::new(dir.path().join("events.jsonl"));
        let run = RunId::new();
        assert!(sink.events(run).await.unwrap().is_empty());

        let failed = Event::builder(run, 1, 0)
            .failure(2.0, ErrorDetail::new(ErrorCategory::Connection, "reset"));
        sink.append(&[event(run, 0, 0), failed.clone()]).await.unwrap();
        sink.append(&[event(RunId::new(), 0, 0)]).await.unwrap();

        let stored = sink.events(run).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1], failed);
    }

    #[tokio::test]
    async fn test_recorder_flushes_everything_on_finish() {
        let sink = Arc::new(MemoryEventSink::new());
        let (handle, task) = EventRecorder::new(
            sink.clone(),
            RecorderConfig::default().with_batch_size(8),
        )
        .spawn();

        let run = RunId::new();
        for seq in 0..100 {
            handle.record(event(run, 0, seq)).unwrap();
        }
        let report = task.finish().await;

        assert_eq!(report.received, 100);
        assert_eq!(report.flushed, 100);
        assert!(report.unflushed.is_empty());
        assert_eq!(sink.len(), 100);
        tokio_test::assert_err!(handle.record(event(run, 0, 100)));
    }

    #[tokio::test]
    async fn test_recorder_preserves_session_order() {
        let sink = Arc::new(MemoryEventSink::new());
        let (handle, task) =
            EventRecorder::new(sink.clone(), RecorderConfig::default().with_batch_size(5)).spawn();
        let run = RunId::new();

        let mut producers = Vec::new();
        for session in 0..4 {
            let handle = handle.clone();
            producers.push(tokio::spawn(async move {
                for seq in 0..50 {
                    handle.record(event(run, session, seq)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        task.finish().await;

        let stored = sink.events(run).await.unwrap();
        assert_eq!(stored.len(), 200);
        for session in 0..4 {
            let seqs: Vec<u64> = stored
                .iter()
                .filter(|e| e.session == session)
                .map(|e| e.sequence)
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_recorder_retries_failed_flush() {
        let sink = Arc::new(FlakySink {
            inner: MemoryEventSink::new(),
            failures: AtomicU32::new(2),
        });
        let (handle, task) = EventRecorder::new(
            sink.clone(),
            RecorderConfig::default().with_retry(fast_retry(3)),
        )
        .spawn();
        let run = RunId::new();
        for seq in 0..10 {
            handle.record(event(run, 0, seq)).unwrap();
        }
        let report = task.finish().await;
        assert_eq!(report.flushed, 10);
        assert_eq!(report.failed_flushes, 0);
        assert_eq!(sink.events(run).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_recorder_holds_events_when_retries_exhaust() {
        let sink = Arc::new(FlakySink {
            inner: MemoryEventSink::new(),
            failures: AtomicU32::new(u32::MAX),
        });
        let (handle, task) = EventRecorder::new(
            sink.clone(),
            RecorderConfig::default().with_retry(fast_retry(1)),
        )
        .spawn();
        let run = RunId::new();
        for seq in 0..5 {
            handle.record(event(run, 0, seq)).unwrap();
        }
        let report = task.finish().await;
        assert_eq!(report.flushed, 0);
        assert!(report.failed_flushes >= 1);
        assert_eq!(report.unflushed.len(), 5);
    }

    #[tokio::test]
    async fn test_recorder_forwards_unflushed_events_on_shutdown() {
        let sink = Arc::new(FlakySink {
            inner: MemoryEventSink::new(),
            failures: AtomicU32::new(u32::MAX),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, task) = EventRecorder::new(
            sink.clone(),
            RecorderConfig::default().with_retry(fast_retry(0)),
        )
        .forward_to(tx)
        .spawn();
        let run = RunId::new();
        for seq in 0..3 {
            handle.record(event(run, 0, seq)).unwrap();
        }
        drop(handle);
        let report = task.finish().await;

        assert_eq!(report.unflushed.len(), 3);
        let mut forwarded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            forwarded.push(event.sequence);
        }
        assert_eq!(forwarded, vec![0, 1, 2]);
        assert!(sink.events(run).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recorder_forwards_flushed_events() {
        let sink = Arc::new(MemoryEventSink::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, task) = EventRecorder::new(sink, RecorderConfig::default())
            .forward_to(tx)
            .spawn();
        let run = RunId::new();
        handle.record(event(run, 0, 0)).unwrap();
        handle.record(event(run, 0, 1)).unwrap();
        task.finish().await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.sequence, second.sequence), (0, 1));
    }
}
