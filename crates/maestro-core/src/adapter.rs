//! The step-executing adapter capability.
//!
//! The Runner drives workflow execution but does not execute steps itself:
//! an external adapter turns each parsed step into an outcome (LLM call,
//! connector operation, shell command, ...). The Runner knows nothing about
//! step internals; it supplies hooks the adapter fires around each step so
//! progress, events, and checkpoints stay in the core.

use futures_util::future::BoxFuture;
use maestro_types::error::EngineError;
use maestro_types::event::StepStatus;
use maestro_types::run::ResourceOverrides;
use maestro_types::workflow::Definition;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Everything an adapter needs to execute one workflow.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    /// The workflow to execute.
    pub definition: Definition,
    /// Frozen run inputs.
    pub inputs: serde_json::Map<String, Value>,
    /// Workflow context: `{"inputs": {...}, "steps": {...}}`. Pre-seeded
    /// for resume and replay; fresh runs start with empty step outputs.
    pub context: Value,
    /// Index of the first step to execute (non-zero for resume/replay).
    pub start_index: usize,
    /// Per-run resource overrides.
    pub overrides: ResourceOverrides,
}

/// Result of one step, reported through [`StepHooks::on_step_end`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl StepOutcome {
    /// A successful outcome carrying an output value.
    pub fn success(output: Value) -> Self {
        Self {
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            duration_ms: 0,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// A skipped outcome (condition gate evaluated false).
    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// A failed outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Terminal adapter outcomes the Runner maps onto run status.
///
/// Cancellation is a distinct signal here, not an [`EngineError`] kind.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The run's scope was cancelled at a suspension point.
    #[error("workflow cancelled")]
    Cancelled,

    /// A step exceeded its deadline.
    #[error("step '{step_id}' timed out")]
    StepTimeout { step_id: String },

    /// Any other step failure.
    #[error(transparent)]
    Failed(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Callbacks the adapter fires around each step. Implemented by the Runner.
///
/// Implementations clone borrowed arguments before awaiting, so returned
/// futures only borrow `self`.
pub trait StepHooks: Send + Sync {
    /// Fired before a step executes. `context` is the workflow context the
    /// step will see (checkpointed by the Runner).
    fn on_step_start(
        &self,
        step_id: &str,
        step_name: &str,
        index: usize,
        total: usize,
        context: &Value,
    ) -> BoxFuture<'_, ()>;

    /// Fired after a step finishes, with its classified outcome.
    fn on_step_end(
        &self,
        step_id: &str,
        step_name: &str,
        index: usize,
        outcome: &StepOutcome,
    ) -> BoxFuture<'_, ()>;
}

/// The adapter capability: execute a workflow, firing hooks per step.
///
/// On success the returned value is the final workflow context
/// (`{"workflow": ..., "inputs": ..., "steps": {"<id>": {"output": ...}}}`);
/// the Runner resolves the run output from it (output templates, else the
/// last step's output). The adapter must observe `cancel` at every
/// suspension point and return [`AdapterError::Cancelled`] once it fires.
pub trait WorkflowAdapter: Send + Sync {
    fn execute_workflow(
        &self,
        request: AdapterRequest,
        hooks: std::sync::Arc<dyn StepHooks>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Value, AdapterError>>;
}
