//! Canonical span names and field keys for engine telemetry.
//!
//! Every surface that reports on a run or a connector call uses the same
//! span names and field keys, so log pipelines and trace queries can join
//! on them regardless of which crate emitted the record.

use tracing::Span;

/// Span covering one workflow run, from admission to terminal status.
pub const RUN_SPAN: &str = "workflow_run";

/// Span covering one step execution inside a run.
pub const STEP_SPAN: &str = "workflow_step";

/// Span covering one connector operation call.
pub const CONNECTOR_SPAN: &str = "connector_call";

/// Field key for the 8-char run id.
pub const RUN_ID: &str = "run_id";

/// Field key for the workflow name.
pub const WORKFLOW: &str = "workflow";

/// Field key for the step id.
pub const STEP_ID: &str = "step_id";

/// Field key for the connector name.
pub const CONNECTOR: &str = "connector";

/// Field key for the operation name.
pub const OPERATION: &str = "operation";

/// Build the span for one workflow run.
pub fn run_span(run_id: &str, workflow: &str) -> Span {
    tracing::info_span!(RUN_SPAN, run_id, workflow)
}

/// Build the span for one step within a run.
pub fn step_span(run_id: &str, step_id: &str) -> Span {
    tracing::info_span!(STEP_SPAN, run_id, step_id)
}

/// Build the span for one connector operation call.
pub fn connector_span(connector: &str, operation: &str) -> Span {
    tracing::debug_span!(CONNECTOR_SPAN, connector, operation)
}
