//! Replay engine: cached-output restoration with structural validation.
//!
//! A replay re-executes a parent run. The prefix before `from_step_id`
//! restores cached outputs; the remainder re-executes. Override inputs and
//! step outputs are validated and sanitized so caller-supplied values can
//! never smuggle template syntax into expressions, and the parent's step
//! layout must structurally match the current workflow definition.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use maestro_types::error::EngineError;
use maestro_types::replay::{ReplayConfig, ReplayCostEstimate, StepCostEntry, StepResultRecord};
use maestro_types::workflow::Definition;
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// RunHistory
// ---------------------------------------------------------------------------

/// Source of parent-run data for replays. Implemented by the run store.
pub trait RunHistory: Send + Sync {
    /// Per-step results of a finished run, `None` when the run is unknown.
    fn step_results(
        &self,
        run_id: &str,
    ) -> BoxFuture<'_, Result<Option<Vec<StepResultRecord>>, EngineError>>;

    /// The inputs the run was submitted with, `None` when unknown.
    fn run_inputs(
        &self,
        run_id: &str,
    ) -> BoxFuture<'_, Result<Option<Map<String, Value>>, EngineError>>;
}

// ---------------------------------------------------------------------------
// Validation and sanitization
// ---------------------------------------------------------------------------

fn is_safe_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Find the first string anywhere inside `value` containing template
/// delimiters (`{{`, `}}`, `${`).
fn find_template_delimiters(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => {
            if s.contains("{{") || s.contains("}}") || s.contains("${") {
                Some(s)
            } else {
                None
            }
        }
        Value::Array(items) => items.iter().find_map(find_template_delimiters),
        Value::Object(map) => map.values().find_map(find_template_delimiters),
        _ => None,
    }
}

/// Break template delimiters in a string by inserting a backslash between
/// the paired characters. Idempotent: output contains no `{{`, `}}`, `${`.
fn escape_delimiters(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let prev = out.chars().last();
        let needs_break = matches!(
            (prev, c),
            (Some('{'), '{') | (Some('}'), '}') | (Some('$'), '{')
        );
        if needs_break {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape_delimiters(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Escape `{{`, `}}`, `${` in every string value, recursively through maps
/// and arrays. Non-strings pass through unchanged. Idempotent.
pub fn sanitize_override_inputs(inputs: &Map<String, Value>) -> Map<String, Value> {
    inputs
        .iter()
        .map(|(k, v)| (k.clone(), sanitize_value(v)))
        .collect()
}

/// Validate a replay configuration.
pub fn validate_replay_config(config: &ReplayConfig) -> Result<(), EngineError> {
    if config.parent_run_id.is_empty() {
        return Err(EngineError::validation("replay requires parent_run_id"));
    }

    if let Some(max_cost) = config.max_cost {
        if !max_cost.is_finite() || max_cost < 0.0 {
            return Err(EngineError::validation(format!(
                "max_cost must be >= 0 (got {max_cost})"
            )));
        }
    }

    if let Some(from) = &config.from_step_id {
        if !is_safe_identifier(from) {
            return Err(EngineError::validation(format!(
                "from_step_id '{from}' is not a valid step id"
            )));
        }
    }

    if let Some(inputs) = &config.override_inputs {
        for (key, value) in inputs {
            if !is_safe_identifier(key) {
                return Err(EngineError::validation(format!(
                    "override input key '{key}' must match ^[A-Za-z0-9_]+$"
                )));
            }
            if let Some(offender) = find_template_delimiters(value) {
                return Err(EngineError::validation(format!(
                    "override input '{key}' contains template delimiters: '{offender}'"
                )));
            }
        }
    }

    if let Some(steps) = &config.override_steps {
        for (step_id, value) in steps {
            if !is_safe_identifier(step_id) {
                return Err(EngineError::validation(format!(
                    "override step id '{step_id}' must match ^[A-Za-z0-9_]+$"
                )));
            }
            serde_json::to_string(value).map_err(|e| {
                EngineError::validation(format!(
                    "override step '{step_id}' value is not JSON-serializable: {e}"
                ))
            })?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Structural compatibility
// ---------------------------------------------------------------------------

/// Check that the parent run's step set and ordering exactly match the
/// current definition. Any add/remove/reorder rejects the replay with a
/// concrete diff.
pub fn validate_cached_outputs(
    parent_results: &[StepResultRecord],
    definition: &Definition,
) -> Result<(), EngineError> {
    let parent: HashMap<&str, usize> = parent_results
        .iter()
        .map(|r| (r.step_id.as_str(), r.index))
        .collect();
    let current: HashMap<&str, usize> = definition
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut removed: Vec<&str> = parent
        .keys()
        .filter(|id| !current.contains_key(**id))
        .copied()
        .collect();
    let mut added: Vec<&str> = current
        .keys()
        .filter(|id| !parent.contains_key(**id))
        .copied()
        .collect();
    let mut moved: Vec<String> = parent
        .iter()
        .filter_map(|(id, parent_index)| {
            current.get(id).and_then(|current_index| {
                (current_index != parent_index)
                    .then(|| format!("{id} ({parent_index} -> {current_index})"))
            })
        })
        .collect();
    removed.sort_unstable();
    added.sort_unstable();
    moved.sort();

    if removed.is_empty() && added.is_empty() && moved.is_empty() {
        return Ok(());
    }

    let mut parts = Vec::new();
    if !removed.is_empty() {
        parts.push(format!("removed from workflow: {}", removed.join(", ")));
    }
    if !added.is_empty() {
        parts.push(format!("added to workflow: {}", added.join(", ")));
    }
    if !moved.is_empty() {
        parts.push(format!("reordered: {}", moved.join(", ")));
    }

    Err(EngineError::validation(format!(
        "replay structural mismatch: step(s) {}",
        parts.join("; ")
    ))
    .with_suggestion("Replay the original workflow version, or submit a fresh run"))
}

// ---------------------------------------------------------------------------
// ReplayEngine
// ---------------------------------------------------------------------------

/// Context handed back to the Runner to resume execution.
#[derive(Debug)]
pub struct ReplayContext {
    /// Workflow context with cached outputs restored and inputs merged.
    pub context: Value,
    /// Merged inputs for the new run.
    pub inputs: Map<String, Value>,
    /// Index of the first step to re-execute.
    pub start_index: usize,
}

/// Validates replays against parent history and constructs resumption
/// contexts.
pub struct ReplayEngine {
    history: Arc<dyn RunHistory>,
}

impl ReplayEngine {
    pub fn new(history: Arc<dyn RunHistory>) -> Self {
        Self { history }
    }

    async fn fetch_parent(
        &self,
        parent_run_id: &str,
    ) -> Result<Vec<StepResultRecord>, EngineError> {
        self.history
            .step_results(parent_run_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("parent run '{parent_run_id}' not found"))
            })
    }

    fn from_index(
        config: &ReplayConfig,
        definition: &Definition,
    ) -> Result<usize, EngineError> {
        match &config.from_step_id {
            None => Ok(0),
            Some(from) => definition
                .steps
                .iter()
                .position(|s| &s.id == from)
                .ok_or_else(|| {
                    EngineError::validation(format!(
                        "from_step_id '{from}' is not a step of workflow '{}'",
                        definition.name
                    ))
                }),
        }
    }

    /// Estimate replay cost: cached steps sum into `skipped_cost`, steps at
    /// or after `from_step_id` re-execute at their parent-recorded cost
    /// (`new_cost`), overridden steps cost zero.
    pub async fn estimate_cost(
        &self,
        config: &ReplayConfig,
        definition: &Definition,
        detailed: bool,
    ) -> Result<ReplayCostEstimate, EngineError> {
        validate_replay_config(config)?;
        let parent = self.fetch_parent(&config.parent_run_id).await?;
        validate_cached_outputs(&parent, definition)?;
        let from_index = Self::from_index(config, definition)?;

        let parent_costs: HashMap<&str, f64> = parent
            .iter()
            .map(|r| (r.step_id.as_str(), r.cost_usd))
            .collect();
        let overridden: std::collections::HashSet<&str> = config
            .override_steps
            .as_ref()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();

        let mut skipped_cost = 0.0;
        let mut new_cost = 0.0;
        let mut entries = Vec::with_capacity(definition.steps.len());

        for (index, step) in definition.steps.iter().enumerate() {
            let parent_cost = parent_costs.get(step.id.as_str()).copied().unwrap_or(0.0);
            let (cached, cost) = if overridden.contains(step.id.as_str()) {
                (true, 0.0)
            } else if index < from_index {
                skipped_cost += parent_cost;
                (true, parent_cost)
            } else {
                new_cost += parent_cost;
                (false, parent_cost)
            };
            if detailed {
                entries.push(StepCostEntry {
                    step_id: step.id.clone(),
                    cached,
                    cost_usd: cost,
                });
            }
        }

        Ok(ReplayCostEstimate {
            skipped_cost,
            new_cost,
            steps: detailed.then_some(entries),
        })
    }

    /// Build the resumption context: cached outputs restored for the prefix,
    /// override-step outputs overlaid (override wins even for cached
    /// positions), override inputs sanitized and merged over the parent's.
    pub async fn build_context(
        &self,
        config: &ReplayConfig,
        definition: &Definition,
    ) -> Result<ReplayContext, EngineError> {
        validate_replay_config(config)?;
        let parent = self.fetch_parent(&config.parent_run_id).await?;
        validate_cached_outputs(&parent, definition)?;
        let from_index = Self::from_index(config, definition)?;

        if let Some(max_cost) = config.max_cost {
            let estimate = self.estimate_cost(config, definition, false).await?;
            if estimate.new_cost > max_cost {
                return Err(EngineError::validation(format!(
                    "estimated replay cost ${:.4} exceeds max_cost ${max_cost:.4}",
                    estimate.new_cost
                )));
            }
        }

        let cached_outputs: HashMap<&str, &StepResultRecord> =
            parent.iter().map(|r| (r.step_id.as_str(), r)).collect();

        let mut steps = Map::new();
        for (index, step) in definition.steps.iter().enumerate() {
            if index >= from_index {
                continue;
            }
            if let Some(record) = cached_outputs.get(step.id.as_str()) {
                if let Some(output) = &record.output {
                    steps.insert(step.id.clone(), json!({ "output": output }));
                }
            }
        }

        // Override values win, even for cached positions.
        if let Some(overrides) = &config.override_steps {
            for (step_id, value) in overrides {
                if definition.steps.iter().any(|s| &s.id == step_id) {
                    steps.insert(step_id.clone(), json!({ "output": value }));
                }
            }
        }

        let mut inputs = self
            .history
            .run_inputs(&config.parent_run_id)
            .await?
            .unwrap_or_default();
        if let Some(overrides) = &config.override_inputs {
            for (key, value) in sanitize_override_inputs(overrides) {
                inputs.insert(key, value);
            }
        }

        let context = json!({
            "workflow": definition.name.clone(),
            "inputs": inputs.clone(),
            "steps": steps,
        });

        Ok(ReplayContext {
            context,
            inputs,
            start_index: from_index,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
