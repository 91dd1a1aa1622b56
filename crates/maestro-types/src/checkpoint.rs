//! Durable per-run checkpoint record.
//!
//! At most one checkpoint exists per run id; the step index is monotonically
//! non-decreasing across updates. On-disk format (one JSON file per run):
//! `{"run_id": str, "step_index": int, "workflow_context": {...},
//! "saved_at": <unix-ns>}`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of a run's step index and workflow context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 8-char run id.
    pub run_id: String,
    /// Index of the step the run was on when the checkpoint was taken.
    pub step_index: usize,
    /// Serialized workflow context: inputs plus accumulated step outputs.
    pub workflow_context: Value,
    /// Unix nanoseconds at save time.
    pub saved_at: i64,
}

impl Checkpoint {
    /// Build a checkpoint stamped with the current time.
    pub fn new(run_id: impl Into<String>, step_index: usize, workflow_context: Value) -> Self {
        Self {
            run_id: run_id.into(),
            step_index,
            workflow_context,
            saved_at: Utc::now().timestamp_nanos_opt().unwrap_or(0),
        }
    }
}
