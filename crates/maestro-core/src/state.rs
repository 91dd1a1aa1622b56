//! Run state manager.
//!
//! The [`StateManager`] exclusively owns the id -> [`Run`] map. The Runner
//! borrows runs by id; mutations still go through each run's own lock.
//! Backend persistence is best-effort: failures are logged and ignored.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use maestro_types::error::EngineError;
use maestro_types::replay::StepResultRecord;
use maestro_types::run::{RunFilter, RunSnapshot};

use crate::run::Run;

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// Best-effort persistence backend for run snapshots and step results.
///
/// Implementations live in `maestro-infra`; tests use in-memory fakes.
pub trait RunStore: Send + Sync {
    /// Persist a run snapshot (terminal state updates use this too).
    fn save_run(&self, snapshot: &RunSnapshot) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Whether this backend records per-step results (replay history).
    fn supports_step_results(&self) -> bool {
        false
    }

    /// Persist one step result for a run.
    fn save_step_result(
        &self,
        _run_id: &str,
        _record: &StepResultRecord,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

/// Owns the mapping from run id to live [`Run`].
pub struct StateManager {
    runs: DashMap<String, Arc<Run>>,
    store: Option<Arc<dyn RunStore>>,
}

impl StateManager {
    /// Create a state manager without a persistence backend.
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
            store: None,
        }
    }

    /// Create a state manager persisting best-effort to `store`.
    pub fn with_store(store: Arc<dyn RunStore>) -> Self {
        Self {
            runs: DashMap::new(),
            store: Some(store),
        }
    }

    /// The persistence backend, if configured.
    pub fn store(&self) -> Option<&Arc<dyn RunStore>> {
        self.store.as_ref()
    }

    /// Register a run.
    pub fn insert(&self, run: Arc<Run>) {
        self.runs.insert(run.id.clone(), run);
    }

    /// Borrow a run by id.
    pub fn get(&self, id: &str) -> Option<Arc<Run>> {
        self.runs.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Deep-copied snapshot of a run.
    pub fn snapshot(&self, id: &str) -> Option<RunSnapshot> {
        self.get(id).map(|run| run.snapshot())
    }

    /// Snapshots of all runs matching `filter`, newest first.
    pub fn list(&self, filter: &RunFilter) -> Vec<RunSnapshot> {
        let mut snapshots: Vec<RunSnapshot> = self
            .runs
            .iter()
            .map(|entry| entry.value().snapshot())
            .filter(|snap| {
                filter
                    .workflow
                    .as_ref()
                    .is_none_or(|w| &snap.workflow_name == w)
                    && filter.status.is_none_or(|s| snap.status == s)
            })
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            snapshots.truncate(limit);
        }
        snapshots
    }

    /// All live runs.
    pub fn all(&self) -> Vec<Arc<Run>> {
        self.runs.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of runs in a non-terminal status.
    pub fn active_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|e| !e.value().status().is_terminal())
            .count()
    }

    /// Remove a run from the map (snapshots already handed out stay valid).
    pub fn remove(&self, id: &str) -> Option<Arc<Run>> {
        self.runs.remove(id).map(|(_, run)| run)
    }

    /// Persist a run snapshot to the backend, logging failures.
    pub async fn persist(&self, run: &Run) {
        let Some(store) = &self.store else { return };
        let snapshot = run.snapshot();
        if let Err(err) = store.save_run(&snapshot).await {
            tracing::warn!(run_id = %run.id, error = %err, "run persistence failed");
        }
    }

    /// Persist one step result, logging failures. A no-op when the backend
    /// does not record step results.
    pub async fn persist_step_result(&self, run_id: &str, record: &StepResultRecord) {
        let Some(store) = &self.store else { return };
        if !store.supports_step_results() {
            return;
        }
        if let Err(err) = store.save_step_result(run_id, record).await {
            tracing::warn!(run_id, step_id = %record.step_id, error = %err, "step persistence failed");
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
