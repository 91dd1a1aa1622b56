//! Run state, snapshots, and submission requests.
//!
//! A `Run` (the live, lock-guarded object) lives in maestro-core; this module
//! defines the serializable pieces: status, progress, resource overrides, the
//! deep-copied [`RunSnapshot`] handed to external callers, and the
//! [`SubmitRequest`] the Runner accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::RunEvent;
use crate::workflow::Definition;

// ---------------------------------------------------------------------------
// Status and progress
// ---------------------------------------------------------------------------

/// Overall status of a run. Terminal statuses are monotonic: once a run is
/// completed, failed, or cancelled no status field changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    DryRun,
}

impl RunStatus {
    /// Whether this status is terminal (`completed|failed|cancelled`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::DryRun => "dry_run",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step progress within a run. `completed <= total` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Id of the step currently executing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Number of steps that finished.
    pub completed: usize,
    /// Total number of steps in the workflow.
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Resource overrides
// ---------------------------------------------------------------------------

/// Per-run resource overrides supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mcp_dev: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug_breakpoints: Vec<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Deep-copied external view of a run. Shares no mutable state with the
/// live run: every collection is copied element-wise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// 8-char opaque run id.
    pub id: String,
    /// Caller-supplied correlation id.
    pub correlation_id: String,
    /// Name of the workflow being executed.
    pub workflow_name: String,
    /// Current status.
    pub status: RunStatus,
    /// Step progress.
    pub progress: Progress,
    /// How the run was triggered ("manual", "webhook", "cron", ...).
    pub trigger: String,
    /// Inputs, frozen at creation.
    pub inputs: serde_json::Map<String, Value>,
    /// Output, written once at terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message, written once on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resource overrides.
    #[serde(default)]
    pub overrides: ResourceOverrides,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When execution began (None while pending).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status. Set iff status is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The run's event log tail (authoritative even when subscriber
    /// channels drop events).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<RunEvent>,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Where the workflow definition comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSource {
    /// A definition parsed by the caller.
    Inline { definition: Definition },
    /// A remote reference resolved through the injected fetcher.
    Remote { url: String },
}

/// A request to execute a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Definition or remote reference.
    pub source: WorkflowSource,
    /// Workflow inputs, frozen after creation.
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
    /// Caller correlation id; generated when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Trigger label for metrics and audit ("manual" when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Resource overrides.
    #[serde(default)]
    pub overrides: ResourceOverrides,
    /// Workspace directory the run resolves relative paths against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Named security profile applied before overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl SubmitRequest {
    /// Build a minimal request from an inline definition.
    pub fn inline(definition: Definition) -> Self {
        Self {
            source: WorkflowSource::Inline { definition },
            inputs: serde_json::Map::new(),
            correlation_id: None,
            trigger: None,
            overrides: ResourceOverrides::default(),
            workspace: None,
            profile: None,
        }
    }

    /// Replace the inputs map.
    pub fn with_inputs(mut self, inputs: serde_json::Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Filter for `Runner::list`.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Only runs of this workflow.
    pub workflow: Option<String>,
    /// Only runs with this status.
    pub status: Option<RunStatus>,
    /// Maximum number of snapshots returned (newest first).
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
