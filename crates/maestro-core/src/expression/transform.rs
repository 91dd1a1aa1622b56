//! Bounded response-transform execution.
//!
//! Operations may declare a response-transform expression evaluated against
//! the decoded body (bound as `response`). The runtime enforces a wall-clock
//! timeout and serialized size caps on both input and output, so a hostile
//! response cannot wedge the executor or balloon memory.

use std::time::Duration;

use maestro_types::error::EngineError;
use serde_json::{Value, json};

/// Default wall-clock timeout for one transform evaluation.
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(1);

/// Default serialized size cap for transform input and output (10 MB).
pub const DEFAULT_MAX_TRANSFORM_BYTES: usize = 10 * 1024 * 1024;

/// Executes transform expressions with a timeout and size caps.
#[derive(Debug, Clone)]
pub struct Transformer {
    timeout: Duration,
    max_bytes: usize,
}

impl Default for Transformer {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRANSFORM_TIMEOUT,
            max_bytes: DEFAULT_MAX_TRANSFORM_BYTES,
        }
    }
}

impl Transformer {
    /// Create a transformer with explicit bounds (tests shrink both).
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        Self { timeout, max_bytes }
    }

    /// Evaluate `expression` against `value` (bound as `response`).
    ///
    /// Fails with a `transform` error on expression failure, timeout, or a
    /// value exceeding the size cap in either direction.
    pub async fn transform(
        &self,
        expression: &str,
        value: &Value,
    ) -> Result<Value, EngineError> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| EngineError::transform(format!("unserializable input: {e}")))?;
        if serialized.len() > self.max_bytes {
            return Err(EngineError::transform(format!(
                "transform input is {} bytes, over the {} byte cap",
                serialized.len(),
                self.max_bytes
            )));
        }

        let expr = expression.to_string();
        let context = json!({ "response": value });

        // The evaluator is CPU-bound; run it off the async threads and bound
        // it with a wall clock. On timeout the blocked task is abandoned.
        let handle = tokio::task::spawn_blocking(move || {
            crate::expression::Evaluator::new()
                .evaluate_value(&expr, &context)
                .map_err(|e| EngineError::transform(e.message))
        });

        let result = match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => {
                return Err(EngineError::transform(format!(
                    "transform expression timed out after {:?}",
                    self.timeout
                )));
            }
            Ok(Err(join_err)) => {
                return Err(EngineError::transform(format!(
                    "transform task failed: {join_err}"
                )));
            }
            Ok(Ok(result)) => result?,
        };

        let out_serialized = serde_json::to_string(&result)
            .map_err(|e| EngineError::transform(format!("unserializable output: {e}")))?;
        if out_serialized.len() > self.max_bytes {
            return Err(EngineError::transform(format!(
                "transform output is {} bytes, over the {} byte cap",
                out_serialized.len(),
                self.max_bytes
            )));
        }

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::error::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_projection() {
        let t = Transformer::default();
        let value = json!({"items": [{"title": "first"}, {"title": "second"}]});
        let out = t.transform("response.items[0].title", &value).await.unwrap();
        assert_eq!(out, json!("first"));
    }

    #[tokio::test]
    async fn test_computed_value() {
        let t = Transformer::default();
        let value = json!({"open": 4.0, "closed": 6.0});
        let out = t
            .transform("response.open + response.closed", &value)
            .await
            .unwrap();
        assert_eq!(out, json!(10.0));
    }

    #[tokio::test]
    async fn test_bad_expression_is_transform_error() {
        let t = Transformer::default();
        let err = t
            .transform("response..broken(", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transform);
    }

    #[tokio::test]
    async fn test_input_size_cap() {
        let t = Transformer::new(DEFAULT_TRANSFORM_TIMEOUT, 64);
        let big = json!({"data": "x".repeat(200)});
        let err = t.transform("response.data", &big).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transform);
        assert!(err.message.contains("cap"));
    }

    #[tokio::test]
    async fn test_identity_on_small_values() {
        let t = Transformer::default();
        let value = json!({"ok": true});
        let out = t.transform("response", &value).await.unwrap();
        assert_eq!(out, value);
    }
}
