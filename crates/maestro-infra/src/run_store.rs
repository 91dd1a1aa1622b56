//! JSON-file run store.
//!
//! Persists run snapshots (`runs/<id>.json`) and per-step results
//! (`runs/<id>.steps.json`), and serves both back as replay history. The
//! Runner treats every write as best-effort; reads are used by the replay
//! engine to validate and restore parent runs.

use std::path::PathBuf;

use futures_util::future::BoxFuture;
use maestro_core::replay::RunHistory;
use maestro_core::state::RunStore;
use maestro_types::error::EngineError;
use maestro_types::replay::StepResultRecord;
use maestro_types::run::RunSnapshot;
use serde_json::{Map, Value};

/// Run store writing JSON files under `<dir>/runs/`.
pub struct JsonRunStore {
    dir: PathBuf,
}

impl JsonRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into().join("runs"),
        }
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn steps_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.steps.json"))
    }

    async fn write_atomic(&self, path: &PathBuf, bytes: Vec<u8>) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &PathBuf,
    ) -> Result<Option<T>, EngineError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(EngineError::connection(format!(
                    "failed to read '{}': {err}",
                    path.display()
                )));
            }
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

impl RunStore for JsonRunStore {
    fn save_run(&self, snapshot: &RunSnapshot) -> BoxFuture<'_, Result<(), EngineError>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            self.write_atomic(&self.run_path(&snapshot.id), bytes).await
        })
    }

    fn supports_step_results(&self) -> bool {
        true
    }

    fn save_step_result(
        &self,
        run_id: &str,
        record: &StepResultRecord,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        let run_id = run_id.to_string();
        let record = record.clone();
        Box::pin(async move {
            let path = self.steps_path(&run_id);
            let mut records: Vec<StepResultRecord> =
                self.read_json(&path).await?.unwrap_or_default();
            // Re-executions of the same step replace the older record.
            records.retain(|r| r.step_id != record.step_id);
            records.push(record);
            records.sort_by_key(|r| r.index);
            let bytes = serde_json::to_vec_pretty(&records)?;
            self.write_atomic(&path, bytes).await
        })
    }
}

impl RunHistory for JsonRunStore {
    fn step_results(
        &self,
        run_id: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<StepResultRecord>>, EngineError>> {
        let path = self.steps_path(run_id);
        Box::pin(async move { self.read_json(&path).await })
    }

    fn run_inputs(
        &self,
        run_id: &str,
    ) -> BoxFuture<'_, Result<Option<Map<String, Value>>, EngineError>> {
        let path = self.run_path(run_id);
        Box::pin(async move {
            let snapshot: Option<RunSnapshot> = self.read_json(&path).await?;
            Ok(snapshot.map(|s| s.inputs))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use maestro_types::event::StepStatus;
    use maestro_types::run::{Progress, ResourceOverrides, RunStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn snapshot(id: &str) -> RunSnapshot {
        RunSnapshot {
            id: id.to_string(),
            correlation_id: "corr".to_string(),
            workflow_name: "w".to_string(),
            status: RunStatus::Completed,
            progress: Progress::default(),
            trigger: "manual".to_string(),
            inputs: json!({"env": "prod"}).as_object().unwrap().clone(),
            output: Some(json!({"ok": true})),
            error: None,
            overrides: ResourceOverrides::default(),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            logs: Vec::new(),
        }
    }

    fn record(step_id: &str, index: usize) -> StepResultRecord {
        StepResultRecord {
            step_id: step_id.to_string(),
            index,
            status: StepStatus::Success,
            output: Some(json!({"n": index})),
            cost_usd: 0.01,
        }
    }

    #[tokio::test]
    async fn test_save_run_and_read_inputs() {
        let dir = TempDir::new().unwrap();
        let store = JsonRunStore::new(dir.path());

        store.save_run(&snapshot("run00001")).await.unwrap();
        let inputs = store.run_inputs("run00001").await.unwrap().unwrap();
        assert_eq!(inputs["env"], json!("prod"));
        assert!(store.run_inputs("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_step_results_accumulate_in_index_order() {
        let dir = TempDir::new().unwrap();
        let store = JsonRunStore::new(dir.path());

        store.save_step_result("r1", &record("b", 1)).await.unwrap();
        store.save_step_result("r1", &record("a", 0)).await.unwrap();

        let results = store.step_results("r1").await.unwrap().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].step_id, "a");
        assert_eq!(results[1].step_id, "b");
    }

    #[tokio::test]
    async fn test_step_rerun_replaces_older_record() {
        let dir = TempDir::new().unwrap();
        let store = JsonRunStore::new(dir.path());

        store.save_step_result("r1", &record("a", 0)).await.unwrap();
        let mut rerun = record("a", 0);
        rerun.cost_usd = 0.5;
        store.save_step_result("r1", &rerun).await.unwrap();

        let results = store.step_results("r1").await.unwrap().unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].cost_usd - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_run_has_no_history() {
        let dir = TempDir::new().unwrap();
        let store = JsonRunStore::new(dir.path());
        assert!(store.step_results("ghost").await.unwrap().is_none());
    }
}
