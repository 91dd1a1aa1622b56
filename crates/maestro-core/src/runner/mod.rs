//! The Runner: workflow scheduler and lifecycle supervisor.
//!
//! Accepts submissions, admits them against a bounded concurrency semaphore,
//! supervises one task per admitted run, mediates cancellation and drain,
//! and serves snapshots plus event subscriptions. The supervising task is
//! the single writer of its run's state machine:
//!
//! ```text
//! pending -> (stopped? cancelled) -> acquire slot (selectable vs stopped)
//!         -> running -> start tools -> adapter executes steps
//!         -> completed | failed | cancelled
//!         -> release slot, stop tools, persist terminal state,
//!            delete checkpoint on completed, emit terminal status event
//! ```

pub mod dry_run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use maestro_types::config::EngineConfig;
use maestro_types::error::EngineError;
use maestro_types::event::{RunEvent, StepStatus};
use maestro_types::replay::StepResultRecord;
use maestro_types::run::{RunFilter, RunSnapshot, RunStatus, SubmitRequest, WorkflowSource};
use maestro_types::workflow::{Definition, validate_definition};
use metrics::{counter, gauge, histogram};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapter::{AdapterError, AdapterRequest, StepHooks, StepOutcome, WorkflowAdapter};
use crate::checkpoint::Checkpointer;
use crate::events::{LogAggregator, SubscriptionGuard};
use crate::expression::template::resolve_string_template;
use crate::lifecycle::LifecycleManager;
use crate::replay::{ReplayEngine, RunHistory};
use crate::run::Run;
use crate::runner::dry_run::{DryRunOptions, ReachabilityProbe, build_plan};
use crate::security::mask_secrets;
use crate::state::{RunStore, StateManager};

/// Poll interval for `wait_for_drain`.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Remote workflow fetching
// ---------------------------------------------------------------------------

/// Resolves remote workflow references into parsed definitions. The YAML
/// parser itself is external; implementations return the parsed value.
pub trait WorkflowFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<Definition, EngineError>>;
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Workflow scheduler and supervisor.
pub struct Runner {
    config: EngineConfig,
    state: Arc<StateManager>,
    aggregator: Arc<LogAggregator>,
    adapter: Arc<dyn WorkflowAdapter>,
    lifecycle: Arc<LifecycleManager>,
    semaphore: Arc<Semaphore>,
    draining: AtomicBool,
    queue_depth: AtomicI64,
    shutdown: CancellationToken,
    fetcher: Option<Arc<dyn WorkflowFetcher>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    replay: Option<ReplayEngine>,
}

impl Runner {
    /// Create a runner with the given adapter and checkpoint store.
    pub fn new(
        config: EngineConfig,
        adapter: Arc<dyn WorkflowAdapter>,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
        Self {
            config,
            state: Arc::new(StateManager::new()),
            aggregator: Arc::new(LogAggregator::new()),
            adapter,
            lifecycle: Arc::new(LifecycleManager::new(checkpointer)),
            semaphore,
            draining: AtomicBool::new(false),
            queue_depth: AtomicI64::new(0),
            shutdown: CancellationToken::new(),
            fetcher: None,
            probe: None,
            replay: None,
        }
    }

    /// Persist run snapshots and step results to `store` (best-effort).
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.state = Arc::new(StateManager::with_store(store));
        self
    }

    /// Resolve remote workflow references through `fetcher`.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn WorkflowFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Probe URLs during dry runs.
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Enable replays against the given parent-run history source.
    pub fn with_history(mut self, history: Arc<dyn RunHistory>) -> Self {
        self.replay = Some(ReplayEngine::new(history));
        self
    }

    /// The lifecycle manager (checkpoint store access for embedders).
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate a request, allocate a pending run, and start its supervising
    /// task. The returned snapshot is immediately readable; execution is
    /// asynchronous.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<RunSnapshot, EngineError> {
        let (definition, request) = self.resolve_definition(request).await?;
        validate_definition(&definition)?;

        let run = Arc::new(Run::new(
            request
                .correlation_id
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            definition.name.clone(),
            request.trigger.unwrap_or_else(|| "manual".to_string()),
            request.inputs.clone(),
            resolve_overrides(request.overrides, request.profile),
        ));

        // The workspace rides in the workflow context so adapters see it and
        // checkpoints carry it across resume.
        let context = json!({
            "workflow": definition.name.clone(),
            "inputs": request.inputs,
            "steps": {},
            "workspace": request.workspace,
        });

        let snapshot = run.snapshot();
        self.admit(run, definition, context, 0);
        Ok(snapshot)
    }

    /// Parse and plan without admitting. The snapshot's status is `dry_run`
    /// and its output carries the [`dry_run::DryRunPlan`].
    pub async fn dry_run(
        &self,
        request: SubmitRequest,
        options: DryRunOptions,
    ) -> Result<RunSnapshot, EngineError> {
        let (definition, request) = self.resolve_definition(request).await?;
        validate_definition(&definition)?;

        let plan = build_plan(
            &definition,
            &request.inputs,
            request.overrides.model.as_deref(),
            options,
            self.probe.as_deref(),
        )
        .await;

        let run = Run::new(
            request
                .correlation_id
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            definition.name,
            request.trigger.unwrap_or_else(|| "dry_run".to_string()),
            request.inputs,
            resolve_overrides(request.overrides, request.profile),
        );
        run.set_dry_run(serde_json::to_value(plan)?);
        Ok(run.snapshot())
    }

    /// Replay a parent run: cached outputs restore the prefix before
    /// `from_step_id`, the remainder re-executes as a new run admitted
    /// through the normal scheduler.
    pub async fn replay(
        self: &Arc<Self>,
        definition: Definition,
        config: &maestro_types::replay::ReplayConfig,
    ) -> Result<RunSnapshot, EngineError> {
        let engine = self.replay.as_ref().ok_or_else(|| {
            EngineError::validation("replay requires a configured run history")
        })?;
        validate_definition(&definition)?;

        let replay_context = engine.build_context(config, &definition).await?;
        let run = Arc::new(Run::new(
            Uuid::now_v7().to_string(),
            definition.name.clone(),
            "replay",
            replay_context.inputs.clone(),
            maestro_types::run::ResourceOverrides::default(),
        ));
        run.seed_progress(replay_context.start_index, definition.steps.len());

        let snapshot = run.snapshot();
        self.admit(
            run,
            definition,
            replay_context.context,
            replay_context.start_index,
        );
        Ok(snapshot)
    }

    /// Reconstruct interrupted runs from checkpoints and admit them.
    pub async fn resume_interrupted(
        self: &Arc<Self>,
        definitions: &std::collections::HashMap<String, Definition>,
    ) -> Result<Vec<RunSnapshot>, EngineError> {
        let resumed = self.lifecycle.resume_interrupted(definitions).await?;
        let mut snapshots = Vec::with_capacity(resumed.len());
        for entry in resumed {
            snapshots.push(entry.run.snapshot());
            self.admit(entry.run, entry.definition, entry.context, entry.start_index);
        }
        Ok(snapshots)
    }

    async fn resolve_definition(
        &self,
        request: SubmitRequest,
    ) -> Result<(Definition, SubmitRequest), EngineError> {
        let definition = match &request.source {
            WorkflowSource::Inline { definition } => definition.clone(),
            WorkflowSource::Remote { url } => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    EngineError::validation(
                        "remote workflow references require a configured fetcher",
                    )
                })?;
                fetcher.fetch(url).await?
            }
        };
        Ok((definition, request))
    }

    fn admit(
        self: &Arc<Self>,
        run: Arc<Run>,
        definition: Definition,
        context: Value,
        start_index: usize,
    ) {
        self.state.insert(Arc::clone(&run));
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.config.enable_metrics {
            gauge!("queue_depth").increment(1.0);
        }

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.supervise(run, definition, context, start_index).await;
        });
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Deep-copied snapshot of a run.
    pub fn get(&self, id: &str) -> Result<RunSnapshot, EngineError> {
        self.state
            .snapshot(id)
            .ok_or_else(|| EngineError::not_found(format!("run '{id}' not found")))
    }

    /// Snapshots of runs matching the filter, newest first.
    pub fn list(&self, filter: &RunFilter) -> Vec<RunSnapshot> {
        self.state.list(filter)
    }

    /// Broadcast the stop signal to a run. Idempotent; pending runs never
    /// proceed to running, running runs observe cancellation at the next
    /// suspension point. The terminal state is set by the supervising task.
    pub fn cancel(&self, id: &str) -> Result<(), EngineError> {
        let run = self
            .state
            .get(id)
            .ok_or_else(|| EngineError::not_found(format!("run '{id}' not found")))?;
        run.cancel();
        Ok(())
    }

    /// Subscribe to a run's event stream (bounded channel, capacity 100).
    pub fn subscribe(
        &self,
        id: &str,
    ) -> Result<(mpsc::Receiver<RunEvent>, SubscriptionGuard), EngineError> {
        if self.state.get(id).is_none() {
            return Err(EngineError::not_found(format!("run '{id}' not found")));
        }
        Ok(self.aggregator.subscribe(id))
    }

    // -----------------------------------------------------------------------
    // Drain and stop
    // -----------------------------------------------------------------------

    /// One-way drain flag. The core only exposes it; rejecting new
    /// submissions is the caller's policy.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of runs not yet in a terminal status.
    pub fn active_run_count(&self) -> usize {
        self.state.active_count()
    }

    /// Poll until no runs are active, the timeout elapses, or the runner is
    /// shut down.
    pub async fn wait_for_drain(&self, timeout: Duration) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.active_run_count();
            if active == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::timeout(format!(
                    "drain timeout: {active} workflow(s) still running"
                )));
            }
            tokio::select! {
                _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
                _ = self.shutdown.cancelled() => {
                    return Err(EngineError::internal("drain wait cancelled"));
                }
            }
        }
    }

    /// Cancel all active runs and wait for their supervising tasks to exit.
    pub async fn stop(&self, timeout: Duration) -> Result<(), EngineError> {
        self.shutdown.cancel();

        let mut receivers = Vec::new();
        for run in self.state.all() {
            if run.status().is_terminal() {
                continue;
            }
            run.cancel();
            if let Some(rx) = run.take_done_receiver() {
                receivers.push(rx);
            }
        }

        let wait_all = async {
            for rx in receivers {
                let _ = rx.await;
            }
        };

        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let remaining = self.active_run_count();
                Err(EngineError::timeout(format!(
                    "stop timeout: {remaining} workflow(s) still running"
                )))
            }
        }
    }

    // -----------------------------------------------------------------------
    // The supervising task
    // -----------------------------------------------------------------------

    async fn supervise(
        self: Arc<Self>,
        run: Arc<Run>,
        definition: Definition,
        context: Value,
        start_index: usize,
    ) {
        let done = run.take_done_sender();
        let mut left_pending = false;

        self.run_to_terminal(&run, definition, context, start_index, &mut left_pending)
            .await;

        self.leave_pending(&mut left_pending);
        self.record_run_metrics(&run);
        self.emit_terminal_status(&run);

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Drive the run to a terminal status. Every exit path has already set
    /// one by the time this returns.
    async fn run_to_terminal(
        self: &Arc<Self>,
        run: &Arc<Run>,
        definition: Definition,
        context: Value,
        start_index: usize,
        left_pending: &mut bool,
    ) {
        // Cancelled before admission: never acquires the slot.
        if run.stopped().is_cancelled() {
            run.mark_cancelled();
            self.state.persist(run).await;
            return;
        }

        // Acquire a slot, selectable against the stop signal.
        let permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        run.fail("scheduler semaphore closed");
                        self.state.persist(run).await;
                        return;
                    }
                }
            }
            _ = run.stopped().cancelled() => {
                run.mark_cancelled();
                self.state.persist(run).await;
                return;
            }
        };

        run.set_running();
        self.leave_pending(left_pending);
        tracing::info!(
            run_id = run.id.as_str(),
            workflow = run.workflow_name.as_str(),
            "run started"
        );

        // External tools; a start failure is terminal.
        let tools = match self.lifecycle.start_tools(&definition.mcp_servers).await {
            Ok(tools) => tools,
            Err(err) => {
                run.fail(mask_secrets(&err.to_string()));
                self.state.persist(run).await;
                return;
            }
        };

        let hooks: Arc<dyn StepHooks> = Arc::new(RunnerHooks {
            run: Arc::clone(run),
            aggregator: Arc::clone(&self.aggregator),
            lifecycle: Arc::clone(&self.lifecycle),
            state: Arc::clone(&self.state),
            enable_metrics: self.config.enable_metrics,
        });

        let request = AdapterRequest {
            definition: definition.clone(),
            inputs: run.inputs(),
            context,
            start_index,
            overrides: run.overrides(),
        };

        let result = self
            .adapter
            .execute_workflow(request, hooks, run.scope().clone())
            .await;

        match result {
            Ok(final_context) => {
                let output = resolve_output(&definition, &final_context);
                run.complete(Some(output));
            }
            Err(AdapterError::Cancelled) => {
                run.mark_cancelled();
            }
            Err(AdapterError::StepTimeout { step_id }) => {
                run.fail(format!("step '{step_id}' timed out"));
            }
            Err(AdapterError::Failed(err)) => {
                run.fail(mask_secrets(&err.to_string()));
            }
        }

        // Teardown: release the slot, stop tools, persist terminal state
        // detached from the run scope, drop the checkpoint on success.
        drop(permit);
        self.lifecycle.stop_tools(tools).await;
        self.state.persist(run).await;
        if run.status() == RunStatus::Completed {
            self.lifecycle.delete_checkpoint(&run.id).await;
        }
    }

    /// Decrement the queue-depth gauge exactly once per run.
    fn leave_pending(&self, left_pending: &mut bool) {
        if *left_pending {
            return;
        }
        *left_pending = true;
        self.queue_depth.fetch_sub(1, Ordering::SeqCst);
        if self.config.enable_metrics {
            gauge!("queue_depth").decrement(1.0);
        }
    }

    fn record_run_metrics(&self, run: &Run) {
        if !self.config.enable_metrics {
            return;
        }
        let snapshot = run.snapshot();
        counter!(
            "runs_total",
            "workflow" => snapshot.workflow_name.clone(),
            "status" => snapshot.status.as_str(),
            "trigger" => snapshot.trigger.clone()
        )
        .increment(1);
        if let (Some(started), Some(completed)) = (snapshot.started_at, snapshot.completed_at) {
            let duration = (completed - started).num_milliseconds().max(0) as f64 / 1000.0;
            histogram!("run_duration_seconds", "workflow" => snapshot.workflow_name)
                .record(duration);
        }
    }

    /// The terminal status event is the last event appended to a run.
    fn emit_terminal_status(&self, run: &Run) {
        let snapshot = run.snapshot();
        self.aggregator.append(
            run,
            RunEvent::Status {
                correlation_id: run.correlation_id.clone(),
                timestamp: Utc::now(),
                status: snapshot.status,
                error: snapshot.error,
            },
        );
        tracing::info!(
            run_id = run.id.as_str(),
            status = %snapshot.status,
            "run finished"
        );
    }
}

/// Fold the request profile into the overrides (profile name recorded as
/// the security profile unless explicitly overridden).
fn resolve_overrides(
    mut overrides: maestro_types::run::ResourceOverrides,
    profile: Option<String>,
) -> maestro_types::run::ResourceOverrides {
    if overrides.security_profile.is_none() {
        overrides.security_profile = profile;
    }
    overrides
}

/// Resolve the run output: workflow output templates against the final
/// context, else the last step output present in it.
fn resolve_output(definition: &Definition, final_context: &Value) -> Value {
    if let Some(outputs) = &definition.outputs {
        let resolved: serde_json::Map<String, Value> = outputs
            .iter()
            .map(|(name, template)| {
                (
                    name.clone(),
                    Value::String(resolve_string_template(template, final_context)),
                )
            })
            .collect();
        return Value::Object(resolved);
    }

    definition
        .steps
        .iter()
        .rev()
        .find_map(|step| {
            final_context
                .get("steps")
                .and_then(|steps| steps.get(&step.id))
                .and_then(|entry| entry.get("output"))
                .cloned()
        })
        .unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Runner-side step hooks
// ---------------------------------------------------------------------------

/// Implements the adapter callbacks: progress, events, checkpointing, and
/// best-effort step persistence.
struct RunnerHooks {
    run: Arc<Run>,
    aggregator: Arc<LogAggregator>,
    lifecycle: Arc<LifecycleManager>,
    state: Arc<StateManager>,
    enable_metrics: bool,
}

impl StepHooks for RunnerHooks {
    fn on_step_start(
        &self,
        step_id: &str,
        step_name: &str,
        index: usize,
        total: usize,
        context: &Value,
    ) -> BoxFuture<'_, ()> {
        let step_id = step_id.to_string();
        let step_name = step_name.to_string();
        let context = context.clone();
        Box::pin(async move {
            self.run.set_current_step(&step_id, index, total);
            self.aggregator.append(
                &self.run,
                RunEvent::StepStart {
                    correlation_id: self.run.correlation_id.clone(),
                    timestamp: Utc::now(),
                    step_id: step_id.clone(),
                    step_name,
                    index,
                    total,
                },
            );
            // Detached from the run scope: the save must survive
            // cancellation.
            self.lifecycle
                .save_checkpoint(&self.run.id, index, &context)
                .await;
        })
    }

    fn on_step_end(
        &self,
        step_id: &str,
        step_name: &str,
        index: usize,
        outcome: &StepOutcome,
    ) -> BoxFuture<'_, ()> {
        let step_id = step_id.to_string();
        let step_name = step_name.to_string();
        let outcome = outcome.clone();
        Box::pin(async move {
            if matches!(outcome.status, StepStatus::Success | StepStatus::Skipped) {
                self.run.mark_step_done(index);
            }
            self.aggregator.append(
                &self.run,
                RunEvent::StepComplete {
                    correlation_id: self.run.correlation_id.clone(),
                    timestamp: Utc::now(),
                    step_id: step_id.clone(),
                    step_name,
                    status: outcome.status,
                    output: outcome.output.clone(),
                    duration_ms: outcome.duration_ms,
                    cost_usd: outcome.cost_usd,
                    input_tokens: outcome.input_tokens,
                    output_tokens: outcome.output_tokens,
                },
            );
            if self.enable_metrics {
                counter!(
                    "steps_total",
                    "workflow" => self.run.workflow_name.clone(),
                    "step" => step_id.clone(),
                    "status" => outcome.status.as_str()
                )
                .increment(1);
            }
            let record = StepResultRecord {
                step_id,
                index,
                status: outcome.status,
                output: outcome.output,
                cost_usd: outcome.cost_usd,
            };
            self.state.persist_step_result(&self.run.id, &record).await;
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
