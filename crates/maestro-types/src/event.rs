//! Structured run events.
//!
//! Events are appended to a run's in-memory log under the per-run lock and
//! fanned out to subscribers. Four kinds: `log`, `step_start`,
//! `step_complete`, and `status` (the terminal event, always last).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::RunStatus;

/// Log severity for `log` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Outcome classification for a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Skipped,
    Failed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
            StepStatus::Error => "error",
        }
    }
}

/// A structured record in a run's event log.
///
/// Every event carries the run's correlation id and a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Free-form log line emitted by the engine or a step.
    Log {
        correlation_id: String,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },
    /// A step began executing.
    StepStart {
        correlation_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        step_name: String,
        /// 0-based position in the workflow.
        index: usize,
        total: usize,
    },
    /// A step finished.
    StepComplete {
        correlation_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        step_name: String,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        duration_ms: u64,
        cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    },
    /// Terminal run status. The last event appended to a run.
    Status {
        correlation_id: String,
        timestamp: DateTime<Utc>,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RunEvent {
    /// The correlation id carried by this event.
    pub fn correlation_id(&self) -> &str {
        match self {
            RunEvent::Log { correlation_id, .. }
            | RunEvent::StepStart { correlation_id, .. }
            | RunEvent::StepComplete { correlation_id, .. }
            | RunEvent::Status { correlation_id, .. } => correlation_id,
        }
    }

    /// Whether this is the terminal `status` event.
    pub fn is_status(&self) -> bool {
        matches!(self, RunEvent::Status { .. })
    }
}
