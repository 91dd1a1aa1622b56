//! Utility builtin connector: small deterministic helpers.
//!
//! Operations: `echo` (returns its inputs), `uuid`, `now`, and a
//! cancellation-aware `sleep`.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use maestro_core::connector::Connector;
use maestro_types::connector::OperationResult;
use maestro_types::error::EngineError;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Longest allowed `sleep` (5 minutes).
pub const MAX_SLEEP_MS: u64 = 300_000;

/// Builtin connector for echo/uuid/now/sleep.
#[derive(Default)]
pub struct UtilityConnector;

impl Connector for UtilityConnector {
    fn name(&self) -> &str {
        "utility"
    }

    fn execute(
        &self,
        operation: &str,
        inputs: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, Result<OperationResult, EngineError>> {
        let operation = operation.to_string();
        let inputs = inputs.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            let value = match operation.as_str() {
                "echo" => Value::Object(inputs),
                "uuid" => json!({"uuid": Uuid::new_v4().to_string()}),
                "now" => {
                    let now = Utc::now();
                    json!({
                        "unix_ms": now.timestamp_millis(),
                        "rfc3339": now.to_rfc3339(),
                    })
                }
                "sleep" => {
                    let duration_ms = inputs
                        .get("duration_ms")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            EngineError::validation("missing required parameter 'duration_ms'")
                        })?;
                    if duration_ms > MAX_SLEEP_MS {
                        return Err(EngineError::validation(format!(
                            "duration_ms {duration_ms} exceeds the {MAX_SLEEP_MS} ms cap"
                        )));
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::cancelled()),
                        _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => {}
                    }
                    json!({"slept_ms": duration_ms})
                }
                other => {
                    return Err(EngineError::not_found(format!(
                        "utility connector has no operation '{other}'"
                    ))
                    .with_suggestion("Known operations: echo, uuid, now, sleep"));
                }
            };
            Ok(OperationResult::from_value(value))
        })
    }
}
