//! Engine-wide error taxonomy.
//!
//! Every error surfaced to a caller is an [`EngineError`]: a machine-readable
//! [`ErrorKind`], a human message, an optional suggestion, and a metadata map
//! for structured details (HTTP status, request id, retry-after). Internal
//! modules may use their own `thiserror` enums and convert at the boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Machine-readable classification of an engine error.
///
/// Rendered kebab-case in messages and serialized forms (`path-injection`,
/// `not-found`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad input, missing required parameter, wrong type.
    Validation,
    /// Missing/invalid credential, env var missing, unsupported auth type.
    Auth,
    /// I/O failure, DNS failure, body-read failure.
    Connection,
    /// Blocked host, private/loopback resolution, not in allow list.
    Ssrf,
    /// Traversal sequence in a path parameter.
    PathInjection,
    /// HTTP status >= 400; carries status, body excerpt, request id.
    Http,
    /// Downstream 429; retry-after propagated in metadata.
    RateLimit,
    /// Expression compile, runtime, or timeout failure.
    Transform,
    /// Connector, operation, or parent run missing.
    NotFound,
    /// Feature stub (e.g. oauth2 client credentials).
    NotImplemented,
    /// Step or operation deadline exceeded.
    Timeout,
    /// Unexpected; logged and reported.
    Internal,
}

impl ErrorKind {
    /// Kebab-case string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Connection => "connection",
            ErrorKind::Ssrf => "ssrf",
            ErrorKind::PathInjection => "path-injection",
            ErrorKind::Http => "http",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::Transform => "transform",
            ErrorKind::NotFound => "not-found",
            ErrorKind::NotImplemented => "not-implemented",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type surfaced by every public engine operation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct EngineError {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Human-readable message. Secret values are masked before emission.
    pub message: String,
    /// Optional remediation hint ("Check that the file path is correct").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Structured details: HTTP status, request id, retry-after, etc.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl EngineError {
    /// Create an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
            metadata: HashMap::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn ssrf(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Ssrf, message)
    }

    pub fn path_injection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathInjection, message)
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transform, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a remediation suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach a structured metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this error carries the given kind.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Cancellation marker. Cancellation is a signal, not a taxonomy kind;
    /// inside layers whose `Result` channel is `EngineError` it travels as
    /// this fixed-message value and is translated back at the adapter
    /// boundary via [`EngineError::is_cancellation`].
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Internal, CANCELLED_MESSAGE)
    }

    /// Whether this error is the cancellation marker.
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Internal && self.message == CANCELLED_MESSAGE
    }
}

/// Message carried by the cancellation marker error.
pub const CANCELLED_MESSAGE: &str = "operation cancelled";

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::connection(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::validation(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_kebab_case() {
        assert_eq!(ErrorKind::PathInjection.as_str(), "path-injection");
        assert_eq!(ErrorKind::RateLimit.as_str(), "rate-limit");
        assert_eq!(ErrorKind::NotImplemented.as_str(), "not-implemented");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Ssrf).unwrap(),
            "\"ssrf\""
        );
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = EngineError::path_injection("parameter 'owner' contains a traversal sequence");
        assert_eq!(
            err.to_string(),
            "path-injection: parameter 'owner' contains a traversal sequence"
        );
    }

    #[test]
    fn test_builders() {
        let err = EngineError::http("GitHub API error (status 404)")
            .with_suggestion("Check that the repository exists")
            .with_metadata("status", json!(404))
            .with_metadata("request_id", json!("abc-123"));
        assert_eq!(err.kind, ErrorKind::Http);
        assert_eq!(err.metadata["status"], json!(404));
        assert!(err.suggestion.as_deref().unwrap().contains("repository"));
    }

    #[test]
    fn test_json_roundtrip() {
        let err = EngineError::rate_limit("rate limited")
            .with_metadata("retry_after", json!(30));
        let s = serde_json::to_string(&err).unwrap();
        let back: EngineError = serde_json::from_str(&s).unwrap();
        assert_eq!(back.kind, ErrorKind::RateLimit);
        assert_eq!(back.metadata["retry_after"], json!(30));
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: EngineError = io.into();
        assert_eq!(err.kind, ErrorKind::Connection);
    }
}
