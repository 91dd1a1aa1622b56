//! Shell builtin connector.
//!
//! One operation, `run`: executes a command through `sh -c` with a
//! timeout, captures stdout/stderr, and reports the exit code. A non-zero
//! exit is data, not an error; spawn failures, timeouts, and cancellation
//! are errors.

use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use maestro_core::connector::Connector;
use maestro_types::connector::OperationResult;
use maestro_types::error::EngineError;
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::required_str;

/// Default timeout for one shell command.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 60;

/// Builtin connector executing shell commands.
pub struct ShellConnector {
    default_timeout: Duration,
}

impl Default for ShellConnector {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_SHELL_TIMEOUT_SECS),
        }
    }
}

impl ShellConnector {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    async fn run(
        &self,
        inputs: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let command = required_str(inputs, "command")?;
        let timeout = inputs
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut builder = Command::new("sh");
        builder
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = inputs.get("cwd").and_then(Value::as_str) {
            builder.current_dir(cwd);
        }

        let child = builder
            .spawn()
            .map_err(|err| EngineError::internal(format!("failed to spawn shell: {err}")))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::cancelled()),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Err(_) => {
                    return Err(EngineError::timeout(format!(
                        "shell command timed out after {}s",
                        timeout.as_secs()
                    )));
                }
                Ok(output) => output.map_err(|err| {
                    EngineError::internal(format!("failed to collect shell output: {err}"))
                })?,
            },
        };

        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": output.status.code(),
            "success": output.status.success(),
        }))
    }
}

impl Connector for ShellConnector {
    fn name(&self) -> &str {
        "shell"
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
            match operation.as_str() {
                "run" => Ok(OperationResult::from_value(
                    self.run(&inputs, &cancel).await?,
                )),
                other => Err(EngineError::not_found(format!(
                    "shell connector has no operation '{other}'"
                ))
                .with_suggestion("Known operations: run")),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::error::ErrorKind;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_exit() {
        let shell = ShellConnector::default();
        let cancel = CancellationToken::new();

        let result = shell
            .execute("run", &inputs(json!({"command": "echo hello"})), &cancel)
            .await
            .unwrap();
        assert_eq!(result.response["stdout"], json!("hello\n"));
        assert_eq!(result.response["exit_code"], json!(0));
        assert_eq!(result.response["success"], json!(true));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_data_not_error() {
        let shell = ShellConnector::default();
        let cancel = CancellationToken::new();

        let result = shell
            .execute(
                "run",
                &inputs(json!({"command": "echo oops >&2; exit 3"})),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(result.response["exit_code"], json!(3));
        assert_eq!(result.response["success"], json!(false));
        assert_eq!(result.response["stderr"], json!("oops\n"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let shell = ShellConnector::default();
        let cancel = CancellationToken::new();

        let err = shell
            .execute(
                "run",
                &inputs(json!({"command": "sleep 5", "timeout_secs": 1})),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let shell = ShellConnector::default();
        let cancel = CancellationToken::new();

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child.cancel();
        });

        let err = shell
            .execute("run", &inputs(json!({"command": "sleep 10"})), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_missing_command_is_validation() {
        let shell = ShellConnector::default();
        let cancel = CancellationToken::new();
        let err = shell
            .execute("run", &Map::new(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
