//! Run lifecycle: the run record, its status state machine and a registry.
//!
//! ```text
//! Pending → Running → Completed
//!    │         ├────→ Stopped
//!    │         └────→ Failed
//!    └──────────────→ Failed | Stopped
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{CoreError, Result};
use crate::metrics::RunMetrics;
use crate::scenario::Scenario;
use crate::types::RunId;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Registered, not started.
    Pending,
    /// Sessions are active.
    Running,
    /// Ran for its full duration.
    Completed,
    /// Stopped on request.
    Stopped,
    /// Failed (invalid scenario, unreachable endpoint, too many failed sessions).
    Failed,
}

impl RunStatus {
    /// Returns true if the run can no longer change status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Returns true if the transition is allowed by the state machine.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed | Self::Stopped)
                | (Self::Running, Self::Completed | Self::Stopped | Self::Failed)
        )
    }

    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution instance of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Frozen scenario.
    pub scenario: Arc<Scenario>,
    /// Current status.
    pub status: RunStatus,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Time the run entered `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the run reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Reason for a `Failed` status.
    pub failure_reason: Option<String>,
    /// Last aggregated metrics.
    pub metrics: Option<RunMetrics>,
}

impl Run {
    /// Creates a pending run for a frozen scenario.
    #[must_use]
    pub fn new(scenario: Arc<Scenario>) -> Self {
        Self {
            id: RunId::new(),
            scenario,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            failure_reason: None,
            metrics: None,
        }
    }

    /// Applies a status transition, stamping start and end times.
    ///
    /// # Errors
    /// Returns `CoreError::Transition` if the state machine forbids it.
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Transition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        if next == RunStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Marks the run failed with a reason.
    ///
    /// # Errors
    /// Returns `CoreError::Transition` if the run is already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

/// Registry of runs, keyed by id.
///
/// Each run sits behind its own mutex so status updates of different runs
/// never contend.
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, Arc<Mutex<Run>>>>,
}

impl RunRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a pending run for a scenario and returns its id.
    pub async fn register(&self, scenario: Arc<Scenario>) -> RunId {
        let run = Run::new(scenario);
        let id = run.id;
        let name = run.scenario.name.clone();
        self.runs.write().await.insert(id, Arc::new(Mutex::new(run)));
        tracing::info!(run = %id, scenario = %name, "registered run");
        id
    }

    async fn entry(&self, id: RunId) -> Result<Arc<Mutex<Run>>> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::RunNotFound(id.to_string()))
    }

    /// Returns a snapshot of a run.
    ///
    /// # Errors
    /// Returns `CoreError::RunNotFound` if the run is not registered.
    pub async fn get(&self, id: RunId) -> Result<Run> {
        let entry = self.entry(id).await?;
        let guard = entry.lock().await;
        Ok(guard.clone())
    }

    /// Returns the status of a run.
    ///
    /// # Errors
    /// Returns `CoreError::RunNotFound` if the run is not registered.
    pub async fn status(&self, id: RunId) -> Result<RunStatus> {
        let entry = self.entry(id).await?;
        let guard = entry.lock().await;
        Ok(guard.status)
    }

    /// Transitions a run.
    ///
    /// # Errors
    /// Returns an error if the run is unknown or the transition is invalid.
    pub async fn transition(&self, id: RunId, next: RunStatus) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut guard = entry.lock().await;
        let old = guard.status;
        guard.transition(next)?;
        tracing::debug!(run = %id, old = %old, new = %next, "run status changed");
        Ok(())
    }

    /// Marks a run failed with a reason.
    ///
    /// # Errors
    /// Returns an error if the run is unknown or already terminal.
    pub async fn fail(&self, id: RunId, reason: impl Into<String>) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut guard = entry.lock().await;
        let reason = reason.into();
        guard.fail(reason.clone())?;
        tracing::warn!(run = %id, reason = %reason, "run failed");
        Ok(())
    }

    /// Stores the latest aggregated metrics of a run.
    ///
    /// # Errors
    /// Returns `CoreError::RunNotFound` if the run is not registered.
    pub async fn set_metrics(&self, id: RunId, metrics: RunMetrics) -> Result<()> {
        let entry = self.entry(id).await?;
        entry.lock().await.metrics = Some(metrics);
        Ok(())
    }

    /// Removes a terminal or pending run.
    ///
    /// # Errors
    /// Returns an error if the run is unknown or still running.
    pub async fn unregister(&self, id: RunId) -> Result<()> {
        let mut runs = self.runs.write().await;
        let entry = runs
            .get(&id)
            .ok_or_else(|| CoreError::RunNotFound(id.to_string()))?;
        let status = entry.lock().await.status;
        if status == RunStatus::Running {
            return Err(CoreError::Transition {
                from: status.to_string(),
                to: "unregistered".to_string(),
            });
        }
        runs.remove(&id);
        tracing::info!(run = %id, "unregistered run");
        Ok(())
    }

    /// Returns the number of registered runs.
    pub async fn count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Returns all run ids.
    pub async fn list(&self) -> Vec<RunId> {
        self.runs.read().await.keys().copied().collect()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Protocol;

    fn scenario() -> Arc<Scenario> {
        Arc::new(Scenario::new(Protocol::SocketStream, "127.0.0.1:9000", 1.0, 1))
    }

    #[test]
    fn test_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Stopped));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Stopped));
    }

    #[test]
    fn test_run_transition_timestamps() {
        let mut run = Run::new(scenario());
        assert!(run.started_at.is_none());
        run.transition(RunStatus::Running).unwrap();
        assert!(run.started_at.is_some());
        assert!(run.ended_at.is_none());
        run.transition(RunStatus::Completed).unwrap();
        assert!(run.ended_at.is_some());
        assert!(run.transition(RunStatus::Running).is_err());
    }

    #[test]
    fn test_run_fail_from_pending() {
        let mut run = Run::new(scenario());
        run.fail("endpoint unresolvable").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.started_at.is_none());
        assert_eq!(run.failure_reason.as_deref(), Some("endpoint unresolvable"));
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = RunRegistry::new();
        let id = registry.register(scenario()).await;
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.status(id).await.unwrap(), RunStatus::Pending);

        registry.transition(id, RunStatus::Running).await.unwrap();
        assert!(registry.unregister(id).await.is_err());

        registry.transition(id, RunStatus::Stopped).await.unwrap();
        let run = registry.get(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Stopped);

        registry.unregister(id).await.unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_not_found() {
        let registry = RunRegistry::default();
        let missing = RunId::new();
        assert!(matches!(
            registry.status(missing).await,
            Err(CoreError::RunNotFound(_))
        ));
        assert!(registry.transition(missing, RunStatus::Running).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_metrics() {
        let registry = RunRegistry::new();
        let id = registry.register(scenario()).await;
        let metrics = RunMetrics {
            total_events: 3,
            ..Default::default()
        };
        registry.set_metrics(id, metrics.clone()).await.unwrap();
        assert_eq!(registry.get(id).await.unwrap().metrics, Some(metrics));
        assert_eq!(registry.list().await, vec![id]);
    }
}
