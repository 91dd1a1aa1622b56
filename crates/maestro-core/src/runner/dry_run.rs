//! Dry-run planning: per-step cost estimates without execution.
//!
//! A dry run parses and validates the workflow, then produces a plan with
//! one entry per step: estimated tokens and cost from the model pricing
//! table, optionally the expanded prompt (secret-masked), the evaluated
//! condition, and HEAD reachability of HTTP step URLs (2 s cap).

use std::time::Duration;

use futures_util::future::BoxFuture;
use maestro_types::error::EngineError;
use maestro_types::workflow::{Definition, StepType};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::expression::template::{preprocess_template, resolve_string_template};
use crate::expression::Evaluator;
use crate::security::mask_secrets;

/// Cap on each dry-run URL reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Model assumed when neither the step nor the overrides name one.
pub const DEFAULT_COST_MODEL: &str = "claude-sonnet-4";

// ---------------------------------------------------------------------------
// Reachability probe
// ---------------------------------------------------------------------------

/// HEAD-request probe used by dry runs; implemented over the HTTP client in
/// `maestro-infra`.
pub trait ReachabilityProbe: Send + Sync {
    /// Whether a HEAD request to `url` answers at all (any status counts).
    fn head(&self, url: &str) -> BoxFuture<'_, Result<bool, EngineError>>;
}

// ---------------------------------------------------------------------------
// Pricing table
// ---------------------------------------------------------------------------

/// One pricing entry; the pattern is a model-name prefix.
struct PricingEntry {
    model_pattern: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

/// Conservative fallback pricing for unknown models (USD per million).
const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

const PRICING_TABLE: &[PricingEntry] = &[
    PricingEntry {
        model_pattern: "claude-opus-4",
        input_cost_per_million: 15.0,
        output_cost_per_million: 75.0,
    },
    PricingEntry {
        model_pattern: "claude-sonnet-4",
        input_cost_per_million: 3.0,
        output_cost_per_million: 15.0,
    },
    PricingEntry {
        model_pattern: "claude-haiku-3",
        input_cost_per_million: 0.25,
        output_cost_per_million: 1.25,
    },
    PricingEntry {
        model_pattern: "gpt-4o-mini",
        input_cost_per_million: 0.15,
        output_cost_per_million: 0.60,
    },
    PricingEntry {
        model_pattern: "gpt-4o",
        input_cost_per_million: 2.50,
        output_cost_per_million: 10.0,
    },
];

/// Rough token estimate: about four characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Estimate USD cost for a request, matching the model by prefix with a
/// conservative fallback.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
    let (input_rate, output_rate) = PRICING_TABLE
        .iter()
        .find(|entry| model.starts_with(entry.model_pattern))
        .map(|entry| (entry.input_cost_per_million, entry.output_cost_per_million))
        .unwrap_or((FALLBACK_INPUT_COST, FALLBACK_OUTPUT_COST));

    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Optional extras a dry run can compute.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunOptions {
    /// Expand step prompts against the (empty-steps) context, secret-masked.
    pub expand_templates: bool,
    /// Evaluate step conditions against the initial context.
    pub evaluate_conditions: bool,
    /// Probe HTTP step URLs with a HEAD request.
    pub probe_urls: bool,
}

/// One step of a dry-run plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub estimated_tokens: u64,
    pub estimated_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_reachable: Option<bool>,
}

/// The full dry-run plan carried in the snapshot's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunPlan {
    pub workflow: String,
    pub total_estimated_cost_usd: f64,
    pub steps: Vec<DryRunStep>,
}

/// Build a dry-run plan for a validated definition.
///
/// Condition evaluation constructs a fresh [`Evaluator`] per expression and
/// drops it in the same statement: the evaluator's transform closures are
/// not `Sync`, and must never live across an await point.
pub async fn build_plan(
    definition: &Definition,
    inputs: &serde_json::Map<String, Value>,
    model_override: Option<&str>,
    options: DryRunOptions,
    probe: Option<&dyn ReachabilityProbe>,
) -> DryRunPlan {
    let context = json!({
        "workflow": definition.name.clone(),
        "inputs": inputs.clone(),
        "steps": {},
    });
    let model = model_override.unwrap_or(DEFAULT_COST_MODEL);

    let mut steps = Vec::with_capacity(definition.steps.len());
    let mut total = 0.0;

    for step in &definition.steps {
        let expanded = step
            .prompt
            .as_deref()
            .map(|prompt| resolve_string_template(prompt, &context));

        let (estimated_tokens, estimated_cost_usd) = match step.step_type {
            StepType::Llm => {
                let input_tokens =
                    estimate_tokens(expanded.as_deref().or(step.prompt.as_deref()).unwrap_or(""));
                // Assume the response runs about half the prompt length.
                let output_tokens = input_tokens / 2;
                (input_tokens, estimate_cost(input_tokens, output_tokens, model))
            }
            _ => (0, 0.0),
        };
        total += estimated_cost_usd;

        let condition_result = if options.evaluate_conditions {
            match &step.condition {
                Some(condition) => preprocess_template(condition, &context)
                    .and_then(|expr| Evaluator::new().evaluate_condition(&expr, &context))
                    .ok(),
                None => Some(true),
            }
        } else {
            None
        };

        let url_reachable = match (options.probe_urls, probe, step_url(step.config.as_ref())) {
            (true, Some(probe), Some(url)) => {
                match tokio::time::timeout(PROBE_TIMEOUT, probe.head(&url)).await {
                    Ok(Ok(reachable)) => Some(reachable),
                    Ok(Err(_)) | Err(_) => Some(false),
                }
            }
            _ => None,
        };

        steps.push(DryRunStep {
            id: step.id.clone(),
            name: step.display_name().to_string(),
            step_type: format!("{:?}", step.step_type).to_lowercase(),
            estimated_tokens,
            estimated_cost_usd,
            expanded_prompt: options
                .expand_templates
                .then(|| expanded.as_deref().map(mask_secrets))
                .flatten(),
            condition_result,
            url_reachable,
        });
    }

    DryRunPlan {
        workflow: definition.name.clone(),
        total_estimated_cost_usd: total,
        steps,
    }
}

fn step_url(config: Option<&Value>) -> Option<String> {
    config
        .and_then(|c| c.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
