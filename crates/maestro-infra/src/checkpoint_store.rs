//! File-backed checkpoint store.
//!
//! One JSON file per run under the checkpoint directory, written with an
//! atomic write-replace (temp file + rename). The step index is enforced
//! monotonically non-decreasing per run; a save with a lower index is
//! dropped with a warning. Corrupt files are skipped, never fatal.

use std::path::PathBuf;

use futures_util::future::BoxFuture;
use maestro_core::checkpoint::Checkpointer;
use maestro_types::checkpoint::Checkpoint;
use maestro_types::error::EngineError;
use serde_json::Value;

/// Checkpoint store writing `<dir>/<run_id>.json` files.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    async fn read(&self, run_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let path = self.path_for(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(EngineError::connection(format!(
                    "failed to read checkpoint '{}': {err}",
                    path.display()
                )));
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(err) => {
                tracing::warn!(run_id, error = %err, "corrupt checkpoint, treating as absent");
                Ok(None)
            }
        }
    }

    async fn write_atomic(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.run_id);
        let tmp = self.dir.join(format!("{}.json.tmp", checkpoint.run_id));
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

impl Checkpointer for FileCheckpointStore {
    fn save(
        &self,
        run_id: &str,
        step_index: usize,
        workflow_context: &Value,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        let run_id = run_id.to_string();
        let context = workflow_context.clone();
        Box::pin(async move {
            if let Some(existing) = self.read(&run_id).await? {
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
            let checkpoint = Checkpoint::new(run_id.clone(), step_index, context);
            self.write_atomic(&checkpoint).await?;
            tracing::debug!(run_id, step_index, "checkpoint saved");
            Ok(())
        })
    }

    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<Option<Checkpoint>, EngineError>> {
        let run_id = run_id.to_string();
        Box::pin(async move { self.read(&run_id).await })
    }

    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let path = self.path_for(run_id);
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(EngineError::connection(format!(
                    "failed to delete checkpoint '{}': {err}",
                    path.display()
                ))),
            }
        })
    }

    fn list_interrupted(&self) -> BoxFuture<'_, Result<Vec<Checkpoint>, EngineError>> {
        Box::pin(async move {
            let mut dir = match tokio::fs::read_dir(&self.dir).await {
                Ok(dir) => dir,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(Vec::new());
                }
                Err(err) => {
                    return Err(EngineError::connection(format!(
                        "failed to list checkpoints in '{}': {err}",
                        self.dir.display()
                    )));
                }
            };

            let mut checkpoints = Vec::new();
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match tokio::fs::read(&path).await {
                    Ok(bytes) => match serde_json::from_slice::<Checkpoint>(&bytes) {
                        Ok(checkpoint) => checkpoints.push(checkpoint),
                        Err(err) => {
                            tracing::warn!(path = %path.display(), error = %err, "skipping corrupt checkpoint");
                        }
                    },
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint");
                    }
                }
            }
            checkpoints.sort_by(|a, b| a.run_id.cmp(&b.run_id));
            Ok(checkpoints)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store
            .save("a1b2c3d4", 1, &json!({"workflow": "w", "steps": {}}))
            .await
            .unwrap();

        let cp = store.load("a1b2c3d4").await.unwrap().unwrap();
        assert_eq!(cp.run_id, "a1b2c3d4");
        assert_eq!(cp.step_index, 1);
        assert!(cp.saved_at > 0);

        store.delete("a1b2c3d4").await.unwrap();
        assert!(store.load("a1b2c3d4").await.unwrap().is_none());
        // Idempotent.
        store.delete("a1b2c3d4").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_replaces_and_stays_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save("r", 0, &json!({"n": 0})).await.unwrap();
        store.save("r", 2, &json!({"n": 2})).await.unwrap();
        // Lower index is dropped.
        store.save("r", 1, &json!({"n": 1})).await.unwrap();

        let cp = store.load("r").await.unwrap().unwrap();
        assert_eq!(cp.step_index, 2);
        assert_eq!(cp.workflow_context, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_wire_format_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store
            .save("feedc0de", 3, &json!({"inputs": {"k": 1}}))
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("feedc0de.json"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["run_id"], json!("feedc0de"));
        assert_eq!(parsed["step_index"], json!(3));
        assert!(parsed["workflow_context"].is_object());
        assert!(parsed["saved_at"].is_i64());
    }

    #[tokio::test]
    async fn test_list_interrupted_skips_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save("good0001", 0, &json!({})).await.unwrap();
        store.save("good0002", 1, &json!({})).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{oops")
            .await
            .unwrap();

        let listed = store.list_interrupted().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.run_id.as_str()).collect();
        assert_eq!(ids, vec!["good0001", "good0002"]);
    }

    #[tokio::test]
    async fn test_list_interrupted_empty_dir_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("never-created"));
        assert!(store.list_interrupted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        tokio::fs::write(dir.path().join("bad.json"), b"not json")
            .await
            .unwrap();
        assert!(store.load("bad").await.unwrap().is_none());
    }
}
