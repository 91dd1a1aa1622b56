//! Builtin connectors: file, shell, transform, utility.
//!
//! Each implements the same [`maestro_core::connector::Connector`]
//! capability as declarative HTTP connectors, so workflow steps address
//! them uniformly (`file.read`, `shell.run`, `transform.apply`,
//! `utility.now`).

pub mod file;
pub mod shell;
pub mod transform;
pub mod utility;

pub use file::FileConnector;
pub use shell::ShellConnector;
pub use transform::TransformConnector;
pub use utility::UtilityConnector;

use maestro_types::error::EngineError;
use serde_json::{Map, Value};

/// Fetch a required string input for a builtin operation.
pub(crate) fn required_str<'a>(
    inputs: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, EngineError> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::validation(format!("missing required parameter '{key}'")))
}
