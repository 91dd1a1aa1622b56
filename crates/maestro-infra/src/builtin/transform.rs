//! Transform builtin connector: apply an expression to a value.

use futures_util::future::BoxFuture;
use maestro_core::connector::Connector;
use maestro_core::expression::transform::Transformer;
use maestro_types::connector::OperationResult;
use maestro_types::error::EngineError;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::required_str;

/// Builtin connector wrapping the bounded [`Transformer`].
#[derive(Default)]
pub struct TransformConnector {
    transformer: Transformer,
}

impl TransformConnector {
    pub fn new(transformer: Transformer) -> Self {
        Self { transformer }
    }
}

impl Connector for TransformConnector {
    fn name(&self) -> &str {
        "transform"
    }

    fn execute(
        &self,
        operation: &str,
        inputs: &Map<String, Value>,
        _cancel: &CancellationToken,
    ) -> BoxFuture<'_, Result<OperationResult, EngineError>> {
        let operation = operation.to_string();
        let inputs = inputs.clone();
        Box::pin(async move {
            if operation != "apply" {
                return Err(EngineError::not_found(format!(
                    "transform connector has no operation '{operation}'"
                ))
                .with_suggestion("Known operations: apply"));
            }

            let expression = required_str(&inputs, "expression")?.to_string();
            let value = inputs
                .get("value")
                .cloned()
                .ok_or_else(|| EngineError::validation("missing required parameter 'value'"))?;

            let transformed = self.transformer.transform(&expression, &value).await?;
            let mut result = OperationResult::from_value(transformed);
            result.raw_response = value;
            Ok(result)
        })
    }
}
