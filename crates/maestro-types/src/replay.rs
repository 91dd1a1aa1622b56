//! Replay configuration and cost-estimate types.
//!
//! A replay re-executes a previous run, restoring cached outputs for the
//! prefix before `from_step_id` and re-running the remainder, optionally with
//! input or per-step output overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::StepStatus;

// ---------------------------------------------------------------------------
// Replay configuration
// ---------------------------------------------------------------------------

/// Caller-supplied replay request.
///
/// Validation rules (enforced by the replay engine):
/// - `parent_run_id` required
/// - `max_cost >= 0`
/// - override input keys and step ids match `^[A-Za-z0-9_]+$`
/// - no string value anywhere in override inputs contains `{{`, `}}` or `${`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Id of the run to replay.
    pub parent_run_id: String,
    /// First step to re-execute; everything before it restores from cache.
    /// When absent the whole workflow re-executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_step_id: Option<String>,
    /// Inputs merged over the parent run's workflow inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_inputs: Option<serde_json::Map<String, Value>>,
    /// Step outputs substituted for cached values, keyed by step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_steps: Option<serde_json::Map<String, Value>>,
    /// Abort if the estimated re-execution cost exceeds this (USD).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    /// Request structural schema validation of cached outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_schema: Option<bool>,
}

// ---------------------------------------------------------------------------
// Parent run history
// ---------------------------------------------------------------------------

/// Persisted result of one step from a prior run, used as replay cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResultRecord {
    /// Step id.
    pub step_id: String,
    /// 0-based position of the step in the parent workflow.
    pub index: usize,
    /// Final classification of the step.
    pub status: StepStatus,
    /// Step output (None for skipped/failed steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Cost incurred by the step in USD.
    #[serde(default)]
    pub cost_usd: f64,
}

// ---------------------------------------------------------------------------
// Cost estimate
// ---------------------------------------------------------------------------

/// Cost attribution for a single step in a replay estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCostEntry {
    pub step_id: String,
    /// Whether the step is served from cache (true) or re-executed.
    pub cached: bool,
    /// Attributed cost in USD: the cached cost for cached steps, the
    /// estimated re-execution cost otherwise. Overridden steps cost zero.
    pub cost_usd: f64,
}

/// Replay cost estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayCostEstimate {
    /// Sum of cached costs avoided by the replay.
    pub skipped_cost: f64,
    /// Estimated cost of the steps that will re-execute.
    pub new_cost: f64,
    /// Per-step breakdown, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepCostEntry>>,
}
