//! Run lifecycle management: external tool processes and checkpoint driving.
//!
//! The [`LifecycleManager`] starts the tool processes a workflow declares
//! (`mcp_servers`), stops them when the run ends, drives checkpoint saves
//! (failures logged, never fatal), and reconstructs pending runs from
//! interrupted checkpoints at boot.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use maestro_types::checkpoint::Checkpoint;
use maestro_types::error::EngineError;
use maestro_types::run::ResourceOverrides;
use maestro_types::workflow::{Definition, McpServerConfig};
use serde_json::Value;
use tokio::process::{Child, Command};

use crate::checkpoint::Checkpointer;
use crate::run::Run;

// ---------------------------------------------------------------------------
// Tool processes
// ---------------------------------------------------------------------------

/// One running external tool process.
#[derive(Debug)]
pub struct ToolHandle {
    pub name: String,
    child: Child,
}

/// The set of tool processes started for a run; doubles as the tool
/// registry (names are looked up by the adapter).
#[derive(Default, Debug)]
pub struct ToolSet {
    tools: Vec<ToolHandle>,
}

impl ToolSet {
    /// Registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

// ---------------------------------------------------------------------------
// Resumed runs
// ---------------------------------------------------------------------------

/// A run reconstructed from an interrupted checkpoint, ready for admission.
pub struct ResumedRun {
    pub run: Arc<Run>,
    pub definition: Definition,
    /// Saved workflow context (`{"workflow": ..., "inputs": ..., "steps": ...}`).
    pub context: Value,
    /// Index of the first step still to execute.
    pub start_index: usize,
}

// ---------------------------------------------------------------------------
// LifecycleManager
// ---------------------------------------------------------------------------

/// Starts/stops per-run tool processes and drives checkpointing.
pub struct LifecycleManager {
    checkpointer: Arc<dyn Checkpointer>,
}

impl LifecycleManager {
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self { checkpointer }
    }

    /// The underlying checkpoint store.
    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    // -----------------------------------------------------------------------
    // Tool processes
    // -----------------------------------------------------------------------

    /// Start every tool the workflow declares. If any spawn fails, the ones
    /// already started are stopped and the error is returned: tool-start
    /// failure is terminal for the run.
    pub async fn start_tools(&self, servers: &[McpServerConfig]) -> Result<ToolSet, EngineError> {
        let mut set = ToolSet::default();

        for server in servers {
            let spawned = Command::new(&server.command)
                .args(&server.args)
                .envs(&server.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(child) => {
                    tracing::debug!(tool = server.name.as_str(), "tool process started");
                    set.tools.push(ToolHandle {
                        name: server.name.clone(),
                        child,
                    });
                }
                Err(err) => {
                    let failed = EngineError::internal(format!(
                        "failed to start tool '{}': {err}",
                        server.name
                    ));
                    self.stop_tools(set).await;
                    return Err(failed);
                }
            }
        }

        Ok(set)
    }

    /// Stop every tool in the set, best-effort.
    pub async fn stop_tools(&self, set: ToolSet) {
        for mut tool in set.tools {
            if let Err(err) = tool.child.start_kill() {
                tracing::warn!(tool = tool.name.as_str(), error = %err, "failed to kill tool");
                continue;
            }
            if let Err(err) = tool.child.wait().await {
                tracing::warn!(tool = tool.name.as_str(), error = %err, "failed to reap tool");
            } else {
                tracing::debug!(tool = tool.name.as_str(), "tool process stopped");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Checkpoint driving
    // -----------------------------------------------------------------------

    /// Save a checkpoint, logging failures. Runs detached from any
    /// cancellation scope so the write survives a cancelled run.
    pub async fn save_checkpoint(&self, run_id: &str, step_index: usize, context: &Value) {
        if let Err(err) = self.checkpointer.save(run_id, step_index, context).await {
            tracing::warn!(run_id, step_index, error = %err, "checkpoint save failed");
        }
    }

    /// Delete a run's checkpoint (successful completion), logging failures.
    pub async fn delete_checkpoint(&self, run_id: &str) {
        if let Err(err) = self.checkpointer.delete(run_id).await {
            tracing::warn!(run_id, error = %err, "checkpoint delete failed");
        }
    }

    // -----------------------------------------------------------------------
    // Boot-time recovery
    // -----------------------------------------------------------------------

    /// Reconstruct pending runs from interrupted checkpoints.
    ///
    /// The saved context supplies the workflow name and inputs; checkpoints
    /// naming a workflow absent from `definitions` are skipped with a
    /// warning (the YAML front end is external, so the caller supplies the
    /// parsed definitions).
    pub async fn resume_interrupted(
        &self,
        definitions: &HashMap<String, Definition>,
    ) -> Result<Vec<ResumedRun>, EngineError> {
        let checkpoints = self.checkpointer.list_interrupted().await?;
        let mut resumed = Vec::new();

        for checkpoint in checkpoints {
            let Checkpoint {
                run_id,
                step_index,
                workflow_context,
                ..
            } = checkpoint;

            let workflow_name = workflow_context
                .get("workflow")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let Some(definition) = definitions.get(&workflow_name) else {
                tracing::warn!(
                    run_id = run_id.as_str(),
                    workflow = workflow_name.as_str(),
                    "skipping interrupted run: workflow definition unknown"
                );
                continue;
            };

            let inputs = workflow_context
                .get("inputs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let run = Arc::new(Run::with_id(
                run_id.clone(),
                format!("resume-{run_id}"),
                workflow_name,
                "resume",
                inputs,
                ResourceOverrides::default(),
            ));
            run.seed_progress(step_index, definition.steps.len());

            tracing::info!(
                run_id = run.id.as_str(),
                workflow = run.workflow_name.as_str(),
                step_index,
                "recovered interrupted run"
            );

            resumed.push(ResumedRun {
                run,
                definition: definition.clone(),
                context: workflow_context,
                start_index: step_index,
            });
        }

        Ok(resumed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
