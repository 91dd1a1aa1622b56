//! The live run object.
//!
//! A [`Run`] is one workflow execution: status, progress, frozen inputs, an
//! append-only event log, and the two cancellation handles (`stopped`
//! broadcast plus a child scope token propagated into I/O). Every mutation is
//! serialized under the per-run lock; external readers only ever receive
//! deep-copied [`RunSnapshot`]s.
//!
//! Terminal statuses are monotonic: after `completed|failed|cancelled` the
//! status, output, error, and completion time never change again.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use maestro_types::event::RunEvent;
use maestro_types::run::{Progress, ResourceOverrides, RunSnapshot, RunStatus};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Generate an 8-char opaque run id.
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Mutable run state guarded by the per-run lock.
#[derive(Debug)]
struct RunState {
    status: RunStatus,
    progress: Progress,
    inputs: serde_json::Map<String, Value>,
    output: Option<Value>,
    error: Option<String>,
    overrides: ResourceOverrides,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    logs: Vec<RunEvent>,
}

/// One workflow execution.
pub struct Run {
    /// 8-char opaque id.
    pub id: String,
    /// Caller correlation id.
    pub correlation_id: String,
    /// Workflow name.
    pub workflow_name: String,
    /// Trigger label ("manual", "webhook", ...).
    pub trigger: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// The "stopped" broadcast, cancelled exactly once by `cancel`.
    stop: CancellationToken,
    /// Scoped cancellation propagated to I/O; child of `stop`.
    scope: CancellationToken,
    /// Pre-allocated channel for shutdown synchronization.
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
    state: Mutex<RunState>,
}

impl Run {
    /// Create a new pending run.
    pub fn new(
        correlation_id: impl Into<String>,
        workflow_name: impl Into<String>,
        trigger: impl Into<String>,
        inputs: serde_json::Map<String, Value>,
        overrides: ResourceOverrides,
    ) -> Self {
        Self::with_id(
            new_run_id(),
            correlation_id,
            workflow_name,
            trigger,
            inputs,
            overrides,
        )
    }

    /// Create a pending run with an explicit id (checkpoint resume keeps the
    /// interrupted run's id so its checkpoint stays attached).
    pub fn with_id(
        id: impl Into<String>,
        correlation_id: impl Into<String>,
        workflow_name: impl Into<String>,
        trigger: impl Into<String>,
        inputs: serde_json::Map<String, Value>,
        overrides: ResourceOverrides,
    ) -> Self {
        let stop = CancellationToken::new();
        let scope = stop.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        Self {
            id: id.into(),
            correlation_id: correlation_id.into(),
            workflow_name: workflow_name.into(),
            trigger: trigger.into(),
            created_at: Utc::now(),
            stop,
            scope,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx: Mutex::new(Some(done_rx)),
            state: Mutex::new(RunState {
                status: RunStatus::Pending,
                progress: Progress::default(),
                inputs,
                output: None,
                error: None,
                overrides,
                started_at: None,
                completed_at: None,
                logs: Vec::new(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation handles
    // -----------------------------------------------------------------------

    /// Broadcast the "stopped" signal and cancel the I/O scope. Idempotent.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// The "stopped" broadcast token.
    pub fn stopped(&self) -> &CancellationToken {
        &self.stop
    }

    /// The scoped cancellation token propagated into step I/O.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Take the shutdown-synchronization sender (supervising task side).
    pub fn take_done_sender(&self) -> Option<oneshot::Sender<()>> {
        self.done_tx.lock().expect("run lock poisoned").take()
    }

    /// Take the shutdown-synchronization receiver (`Runner::stop` side).
    pub fn take_done_receiver(&self) -> Option<oneshot::Receiver<()>> {
        self.done_rx.lock().expect("run lock poisoned").take()
    }

    // -----------------------------------------------------------------------
    // State transitions (single writer: the supervising task)
    // -----------------------------------------------------------------------

    /// Current status.
    pub fn status(&self) -> RunStatus {
        self.state.lock().expect("run lock poisoned").status
    }

    /// Whether the run reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Transition pending -> running and stamp the start time. A no-op once
    /// terminal.
    pub fn set_running(&self) {
        let mut state = self.state.lock().expect("run lock poisoned");
        if state.status.is_terminal() {
            return;
        }
        state.status = RunStatus::Running;
        state.started_at = Some(Utc::now());
    }

    /// Record that a step began: progress pointer plus total.
    pub fn set_current_step(&self, step_id: &str, index: usize, total: usize) {
        let mut state = self.state.lock().expect("run lock poisoned");
        if state.status.is_terminal() {
            return;
        }
        state.progress.current_step = Some(step_id.to_string());
        state.progress.completed = index.min(total);
        state.progress.total = total;
    }

    /// Record that a step finished.
    pub fn mark_step_done(&self, index: usize) {
        let mut state = self.state.lock().expect("run lock poisoned");
        if state.status.is_terminal() {
            return;
        }
        state.progress.completed = (index + 1).min(state.progress.total);
    }

    /// Seed progress for a resumed run (checkpoint restore).
    pub fn seed_progress(&self, completed: usize, total: usize) {
        let mut state = self.state.lock().expect("run lock poisoned");
        state.progress.completed = completed.min(total);
        state.progress.total = total;
    }

    /// The id of the step currently executing, if any.
    pub fn current_step(&self) -> Option<String> {
        self.state
            .lock()
            .expect("run lock poisoned")
            .progress
            .current_step
            .clone()
    }

    /// Terminal transition to `completed`. Returns false if already terminal.
    pub fn complete(&self, output: Option<Value>) -> bool {
        let mut state = self.state.lock().expect("run lock poisoned");
        if state.status.is_terminal() {
            return false;
        }
        state.status = RunStatus::Completed;
        state.output = output;
        state.progress.current_step = None;
        state.progress.completed = state.progress.total;
        state.completed_at = Some(Utc::now());
        true
    }

    /// Terminal transition to `failed`. Returns false if already terminal.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        let mut state = self.state.lock().expect("run lock poisoned");
        if state.status.is_terminal() {
            return false;
        }
        state.status = RunStatus::Failed;
        state.error = Some(error.into());
        state.completed_at = Some(Utc::now());
        true
    }

    /// Terminal transition to `cancelled`. Returns false if already terminal.
    pub fn mark_cancelled(&self) -> bool {
        let mut state = self.state.lock().expect("run lock poisoned");
        if state.status.is_terminal() {
            return false;
        }
        state.status = RunStatus::Cancelled;
        state.completed_at = Some(Utc::now());
        true
    }

    /// Mark a dry-run snapshot: status `dry_run` with the plan as output.
    pub fn set_dry_run(&self, plan: Value) {
        let mut state = self.state.lock().expect("run lock poisoned");
        state.status = RunStatus::DryRun;
        state.output = Some(plan);
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    /// Append an event to the run's ordered log (under the per-run lock).
    pub fn append_event(&self, event: RunEvent) {
        self.state.lock().expect("run lock poisoned").logs.push(event);
    }

    /// Number of events in the log.
    pub fn log_len(&self) -> usize {
        self.state.lock().expect("run lock poisoned").logs.len()
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Produce a deep-copied snapshot sharing no mutable state with the run.
    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.state.lock().expect("run lock poisoned");
        RunSnapshot {
            id: self.id.clone(),
            correlation_id: self.correlation_id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: state.status,
            progress: state.progress.clone(),
            trigger: self.trigger.clone(),
            inputs: state.inputs.clone(),
            output: state.output.clone(),
            error: state.error.clone(),
            overrides: state.overrides.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            logs: state.logs.clone(),
        }
    }

    /// The frozen inputs (cloned).
    pub fn inputs(&self) -> serde_json::Map<String, Value> {
        self.state.lock().expect("run lock poisoned").inputs.clone()
    }

    /// The resource overrides (cloned).
    pub fn overrides(&self) -> ResourceOverrides {
        self.state.lock().expect("run lock poisoned").overrides.clone()
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("workflow_name", &self.workflow_name)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::event::{LogLevel, RunEvent};
    use serde_json::json;

    fn test_run() -> Run {
        Run::new(
            "corr-1",
            "deploy",
            "manual",
            json!({"env": "prod"}).as_object().unwrap().clone(),
            ResourceOverrides::default(),
        )
    }

    #[test]
    fn test_run_id_is_8_chars() {
        let id = new_run_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = test_run();
        assert_eq!(run.status(), RunStatus::Pending);
        assert!(!run.is_terminal());
        assert!(run.snapshot().started_at.is_none());
    }

    #[test]
    fn test_cancel_propagates_to_scope() {
        let run = test_run();
        assert!(!run.scope().is_cancelled());
        run.cancel();
        assert!(run.stopped().is_cancelled());
        assert!(run.scope().is_cancelled());
        // Idempotent
        run.cancel();
    }

    #[test]
    fn test_terminal_status_is_monotonic() {
        let run = test_run();
        run.set_running();
        assert!(run.complete(Some(json!({"ok": true}))));

        // Later transitions are no-ops.
        assert!(!run.fail("too late"));
        assert!(!run.mark_cancelled());
        let snap = run.snapshot();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.output, Some(json!({"ok": true})));
        assert!(snap.error.is_none());

        // Progress mutations after terminal are ignored too.
        run.set_current_step("late", 0, 5);
        assert!(run.snapshot().progress.current_step.is_none());
    }

    #[test]
    fn test_completed_at_set_iff_terminal() {
        let run = test_run();
        assert!(run.snapshot().completed_at.is_none());
        run.set_running();
        assert!(run.snapshot().completed_at.is_none());
        run.fail("boom");
        assert!(run.snapshot().completed_at.is_some());
    }

    #[test]
    fn test_progress_never_exceeds_total() {
        let run = test_run();
        run.set_current_step("a", 0, 2);
        run.mark_step_done(0);
        run.mark_step_done(5);
        let snap = run.snapshot();
        assert!(snap.progress.completed <= snap.progress.total);
        assert_eq!(snap.progress.completed, 2);
    }

    #[test]
    fn test_snapshot_is_deep_copy() {
        let run = test_run();
        run.append_event(RunEvent::Log {
            correlation_id: "corr-1".to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "first".to_string(),
            step_id: None,
        });

        let snap = run.snapshot();
        assert_eq!(snap.logs.len(), 1);

        // Mutating the run afterwards does not change the snapshot.
        run.append_event(RunEvent::Log {
            correlation_id: "corr-1".to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "second".to_string(),
            step_id: None,
        });
        run.set_current_step("b", 1, 3);
        assert_eq!(snap.logs.len(), 1);
        assert!(snap.progress.current_step.is_none());
    }

    #[test]
    fn test_done_channel_taken_once() {
        let run = test_run();
        assert!(run.take_done_sender().is_some());
        assert!(run.take_done_sender().is_none());
        assert!(run.take_done_receiver().is_some());
        assert!(run.take_done_receiver().is_none());
    }

    #[test]
    fn test_dry_run_snapshot() {
        let run = test_run();
        run.set_dry_run(json!({"steps": []}));
        let snap = run.snapshot();
        assert_eq!(snap.status, RunStatus::DryRun);
        assert_eq!(snap.output, Some(json!({"steps": []})));
    }
}
