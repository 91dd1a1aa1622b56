//! Checkpointer capability.
//!
//! One checkpoint per run id: the step index plus the serialized workflow
//! context, enough to reconstruct a pending run at boot. Saves always run
//! detached from the run's cancellation scope so a cancelled run still
//! persists its last position; the file-backed implementation lives in
//! `maestro-infra`.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use maestro_types::checkpoint::Checkpoint;
use maestro_types::error::EngineError;
use serde_json::Value;

/// Durable per-run checkpoint store.
pub trait Checkpointer: Send + Sync {
    /// Atomically write-replace the run's checkpoint.
    fn save(
        &self,
        run_id: &str,
        step_index: usize,
        workflow_context: &Value,
    ) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Load a run's checkpoint, `None` when absent.
    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<Option<Checkpoint>, EngineError>>;

    /// Remove a run's checkpoint. Idempotent.
    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<(), EngineError>>;

    /// All checkpoints left behind by interrupted runs, for boot recovery.
    fn list_interrupted(&self) -> BoxFuture<'_, Result<Vec<Checkpoint>, EngineError>>;
}

/// In-memory checkpointer for tests and embedded use.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    checkpoints: Arc<DashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

impl Checkpointer for InMemoryCheckpointer {
    fn save(
        &self,
        run_id: &str,
        step_index: usize,
        workflow_context: &Value,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        let run_id = run_id.to_string();
        let context = workflow_context.clone();
        Box::pin(async move {
            // Step index is monotonically non-decreasing per run.
            if let Some(existing) = self.checkpoints.get(&run_id) {
                if existing.step_index > step_index {
                    tracing::warn!(
                        run_id,
                        existing = existing.step_index,
                        requested = step_index,
                        "ignoring checkpoint save with lower step index"
                    );
                    return Ok(());
                }
            }
            self.checkpoints
                .insert(run_id.clone(), Checkpoint::new(run_id, step_index, context));
            Ok(())
        })
    }

    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<Option<Checkpoint>, EngineError>> {
        let run_id = run_id.to_string();
        Box::pin(async move { Ok(self.checkpoints.get(&run_id).map(|c| c.clone())) })
    }

    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            self.checkpoints.remove(&run_id);
            Ok(())
        })
    }

    fn list_interrupted(&self) -> BoxFuture<'_, Result<Vec<Checkpoint>, EngineError>> {
        Box::pin(async move {
            Ok(self
                .checkpoints
                .iter()
                .map(|entry| entry.value().clone())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_load_delete_roundtrip() {
        let store = InMemoryCheckpointer::new();
        store.save("r1", 2, &json!({"steps": {}})).await.unwrap();

        let cp = store.load("r1").await.unwrap().unwrap();
        assert_eq!(cp.step_index, 2);

        store.delete("r1").await.unwrap();
        assert!(store.load("r1").await.unwrap().is_none());
        // Idempotent delete
        store.delete("r1").await.unwrap();
    }

    #[tokio::test]
    async fn test_step_index_monotonic() {
        let store = InMemoryCheckpointer::new();
        store.save("r1", 3, &json!({})).await.unwrap();
        store.save("r1", 1, &json!({"late": true})).await.unwrap();

        let cp = store.load("r1").await.unwrap().unwrap();
        assert_eq!(cp.step_index, 3);
        assert_eq!(cp.workflow_context, json!({}));
    }

    #[tokio::test]
    async fn test_list_interrupted() {
        let store = InMemoryCheckpointer::new();
        store.save("r1", 0, &json!({})).await.unwrap();
        store.save("r2", 1, &json!({})).await.unwrap();
        let mut ids: Vec<String> = store
            .list_interrupted()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.run_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["r1", "r2"]);
    }
}
