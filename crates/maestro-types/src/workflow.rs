//! Workflow definition types.
//!
//! The engine consumes an already-parsed [`Definition`]; the YAML front end
//! lives outside the core. These structs are the canonical representation
//! that Submit validates and the adapter iterates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::ConnectorDefinition;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// A parsed workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    /// Workflow name. Alphanumeric plus `-`/`_`.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of steps.
    pub steps: Vec<StepDefinition>,
    /// Trigger configurations. Opaque to the core; trigger scanners are
    /// external collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Value>,
    /// Declarative connectors available to this workflow, keyed by name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub connectors: HashMap<String, ConnectorDefinition>,
    /// Output templates: name -> `{{ ... }}` template resolved against the
    /// final workflow context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, String>>,
    /// External tool processes to start for each run of this workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// The kind of step in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Llm,
    Shell,
    Http,
    File,
    Transform,
    /// A reference to a registered connector operation (`uses` field).
    Connector,
}

/// A single step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// User-defined step ID. Unique within a workflow.
    pub id: String,
    /// Human-readable step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The kind of step.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Optional condition expression; the step is skipped when it
    /// evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Prompt for LLM steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Step-specific configuration payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Inputs passed to the step (connector operation inputs, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<serde_json::Map<String, Value>>,
    /// `connector.operation` reference for connector steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
}

impl StepDefinition {
    /// Display name: explicit name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Configuration for one external tool process (MCP server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Registry name for the tool.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a [`Definition`].
///
/// Checks:
/// - Name is non-empty and contains only alphanumerics, `-`, `_`
/// - At least one step exists
/// - Step ids are unique and match `^[A-Za-z0-9_-]+$`
/// - Connector steps carry a `uses` reference of the form `connector.operation`
pub fn validate_definition(def: &Definition) -> Result<(), EngineError> {
    if def.name.is_empty() {
        return Err(EngineError::validation("workflow name must not be empty"));
    }
    if !def
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::validation(format!(
            "workflow name '{}' contains invalid characters (only alphanumerics, '-' and '_' allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(EngineError::validation(
            "workflow must have at least one step",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for step in &def.steps {
        if step.id.is_empty()
            || !step
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(EngineError::validation(format!(
                "step id '{}' is invalid (only alphanumerics, '-' and '_' allowed)",
                step.id
            )));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(EngineError::validation(format!(
                "duplicate step id: '{}'",
                step.id
            )));
        }
        if step.step_type == StepType::Connector {
            match &step.uses {
                Some(reference) if reference.contains('.') => {}
                Some(reference) => {
                    return Err(EngineError::validation(format!(
                        "step '{}': connector reference '{}' must be 'connector.operation'",
                        step.id, reference
                    )));
                }
                None => {
                    return Err(EngineError::validation(format!(
                        "step '{}': connector steps require a 'uses' reference",
                        step.id
                    )));
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
