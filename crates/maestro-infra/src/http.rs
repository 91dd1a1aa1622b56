//! Declarative HTTP connector executor.
//!
//! Turns a named operation on a [`ConnectorDefinition`] into an HTTP
//! request and classifies the outcome. Per call: default-field injection,
//! rate limiting, URL construction with path-parameter sanitization, the
//! SSRF guard, body build, header screening, auth, the request itself with
//! an operation deadline, response classification, the optional response
//! transform, and metrics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use maestro_core::connector::Connector;
use maestro_core::expression::transform::Transformer;
use maestro_core::security::{UrlGuard, validate_header, validate_path_parameter};
use maestro_types::config::EngineConfig;
use maestro_types::connector::{ConnectorDefinition, OperationDefinition, OperationResult};
use maestro_types::error::EngineError;
use metrics::{counter, histogram};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::apply_auth;
use crate::env::expand_env;
use crate::ratelimit::RateLimiter;

/// Unreserved characters stay literal; everything else in a path segment is
/// percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Longest response-body excerpt carried in error metadata.
const BODY_EXCERPT_LIMIT: usize = 512;

// ---------------------------------------------------------------------------
// HttpConnector
// ---------------------------------------------------------------------------

/// A declarative HTTP connector driven by its definition.
pub struct HttpConnector {
    definition: ConnectorDefinition,
    client: reqwest::Client,
    guard: Arc<UrlGuard>,
    limiter: Option<RateLimiter>,
    transformer: Transformer,
    default_timeout: Duration,
    enable_metrics: bool,
}

impl HttpConnector {
    /// Build a connector from its definition under the engine config's
    /// network policy.
    pub async fn new(
        definition: ConnectorDefinition,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent("maestro-connector/0.1")
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build HTTP client: {e}")))?;

        let limiter = match &definition.rate_limit {
            Some(rate_limit) if rate_limit.is_limited() => Some(
                RateLimiter::load(&definition.name, *rate_limit, &config.state_file_path).await,
            ),
            _ => None,
        };

        Ok(Self {
            client,
            guard: Arc::new(UrlGuard::new(&config.allowed_hosts, &config.blocked_hosts)),
            limiter,
            transformer: Transformer::default(),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            enable_metrics: config.enable_metrics,
            definition,
        })
    }

    fn operation(&self, name: &str) -> Result<&OperationDefinition, EngineError> {
        self.definition.operations.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self
                .definition
                .operations
                .keys()
                .map(String::as_str)
                .collect();
            known.sort_unstable();
            EngineError::not_found(format!(
                "connector '{}' has no operation '{name}'",
                self.definition.name
            ))
            .with_suggestion(format!("Known operations: {}", known.join(", ")))
        })
    }

    async fn execute_operation(
        &self,
        operation_name: &str,
        inputs: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let operation = self.operation(operation_name)?;
        let inputs = inject_defaults(inputs, &self.definition.default_fields);

        // Rate limit; waits beyond 1 ms are recorded.
        let mut wait_ms = 0_u64;
        if let Some(limiter) = &self.limiter {
            let waited = limiter.acquire(&cancel).await?;
            if waited > Duration::from_millis(1) {
                wait_ms = waited.as_millis() as u64;
                if self.enable_metrics {
                    counter!(
                        "connector_rate_limit_waits_total",
                        "connector" => self.definition.name.clone()
                    )
                    .increment(1);
                }
            }
        }

        // URL build + SSRF guard.
        let (url, path_params) =
            build_url(&self.definition.base_url, &operation.path, &inputs)?;
        self.guard.check(&url).await?;

        // Request assembly.
        let mut builder = self
            .client
            .request(method(operation), url.clone())
            .timeout(
                operation
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_timeout),
            );

        for (name, value) in merged_headers(&self.definition, operation) {
            let value = expand_env(&value)?;
            validate_header(&name, &value)?;
            builder = builder.header(name, value);
        }

        if let Some(auth) = &self.definition.auth {
            builder = apply_auth(builder, auth)?;
        }

        if operation.method.has_body() {
            // `.json` sets Content-Type: application/json unless a header
            // already did.
            builder = builder.json(&body_inputs(&inputs, &path_params));
        }

        // Request + response read, cancellable via the run scope.
        let started = tokio::time::Instant::now();
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                self.record(operation_name, "cancelled", started);
                return Err(EngineError::cancelled());
            }
            result = builder.send() => result.map_err(|err| {
                self.record(operation_name, "error", started);
                classify_transport_error(&self.definition.name, operation_name, err)
            })?,
        };

        let status = response.status().as_u16();
        let headers = response_headers(&response);
        let body = response.bytes().await.map_err(|err| {
            self.record(operation_name, "error", started);
            EngineError::connection(format!(
                "failed to read response body from '{}.{operation_name}': {err}",
                self.definition.name
            ))
        })?;
        self.record(operation_name, &status.to_string(), started);

        let raw = classify_response(
            &self.definition.name,
            operation_name,
            status,
            &headers,
            &body,
        )?;

        // Response transform; the raw value is kept for debugging.
        let transformed = match &operation.transform {
            Some(expression) => self.transformer.transform(expression, &raw).await?,
            None => raw.clone(),
        };

        let mut metadata = HashMap::from([(
            "duration_ms".to_string(),
            json!(started.elapsed().as_millis() as u64),
        )]);
        if wait_ms > 0 {
            metadata.insert("rate_limit_wait_ms".to_string(), json!(wait_ms));
        }

        Ok(OperationResult {
            response: transformed,
            raw_response: raw,
            status_code: Some(status),
            headers,
            metadata,
        })
    }

    fn record(&self, operation: &str, status: &str, started: tokio::time::Instant) {
        if !self.enable_metrics {
            return;
        }
        counter!(
            "connector_requests_total",
            "connector" => self.definition.name.clone(),
            "operation" => operation.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            "connector_request_duration_seconds",
            "connector" => self.definition.name.clone(),
            "operation" => operation.to_string()
        )
        .record(started.elapsed().as_secs_f64());
    }
}

impl Connector for HttpConnector {
    fn name(&self) -> &str {
        &self.definition.name
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
        Box::pin(async move { self.execute_operation(&operation, inputs, cancel).await })
    }
}

fn method(operation: &OperationDefinition) -> reqwest::Method {
    match operation.method {
        maestro_types::connector::HttpMethod::Get => reqwest::Method::GET,
        maestro_types::connector::HttpMethod::Post => reqwest::Method::POST,
        maestro_types::connector::HttpMethod::Put => reqwest::Method::PUT,
        maestro_types::connector::HttpMethod::Patch => reqwest::Method::PATCH,
        maestro_types::connector::HttpMethod::Delete => reqwest::Method::DELETE,
        maestro_types::connector::HttpMethod::Head => reqwest::Method::HEAD,
    }
}

// ---------------------------------------------------------------------------
// Pipeline pieces
// ---------------------------------------------------------------------------

/// Connector-specific well-known fields get defaults when the caller omits
/// them.
fn inject_defaults(
    mut inputs: Map<String, Value>,
    defaults: &HashMap<String, Value>,
) -> Map<String, Value> {
    for (key, value) in defaults {
        inputs.entry(key.clone()).or_insert_with(|| value.clone());
    }
    inputs
}

fn stringify_scalar(name: &str, value: &Value) -> Result<String, EngineError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(EngineError::validation(format!(
            "path parameter '{name}' must be a scalar (got {other})"
        ))),
    }
}

/// Substitute `{name}` placeholders, sanitize and percent-encode each value,
/// and join base and path with exactly one `/`.
pub(crate) fn build_url(
    base_url: &str,
    path_template: &str,
    inputs: &Map<String, Value>,
) -> Result<(Url, HashSet<String>), EngineError> {
    let mut path = String::with_capacity(path_template.len());
    let mut path_params = HashSet::new();
    let mut rest = path_template;

    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(EngineError::validation(format!(
                "unclosed '{{' in path template '{path_template}'"
            )));
        };

        let name = &after[..end];
        let value = inputs.get(name).ok_or_else(|| {
            EngineError::validation(format!("missing required parameter '{name}'"))
        })?;
        let raw = stringify_scalar(name, value)?;
        validate_path_parameter(name, &raw)?;
        path.push_str(&utf8_percent_encode(&raw, PATH_SEGMENT).to_string());
        path_params.insert(name.to_string());

        rest = &after[end + 1..];
    }
    path.push_str(rest);

    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let url = Url::parse(&joined)
        .map_err(|e| EngineError::validation(format!("invalid URL '{joined}': {e}")))?;
    Ok((url, path_params))
}

/// Connector-level headers first, then operation-level overriding.
fn merged_headers(
    definition: &ConnectorDefinition,
    operation: &OperationDefinition,
) -> HashMap<String, String> {
    let mut merged = definition.headers.clone();
    merged.extend(
        operation
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    merged
}

/// POST/PUT/PATCH bodies: the inputs minus path parameters, as JSON.
pub(crate) fn body_inputs(
    inputs: &Map<String, Value>,
    path_params: &HashSet<String>,
) -> Map<String, Value> {
    inputs
        .iter()
        .filter(|(key, _)| !path_params.contains(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn response_headers(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn classify_transport_error(
    connector: &str,
    operation: &str,
    err: reqwest::Error,
) -> EngineError {
    if err.is_timeout() {
        EngineError::timeout(format!("'{connector}.{operation}' timed out: {err}"))
    } else {
        EngineError::connection(format!("'{connector}.{operation}' request failed: {err}"))
    }
}

/// Classify a response: status >= 400 becomes a typed error carrying the
/// status, a body excerpt, and any request id header; otherwise the body is
/// JSON-decoded, falling back to a string.
pub(crate) fn classify_response(
    connector: &str,
    operation: &str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Result<Value, EngineError> {
    if status >= 400 {
        let excerpt: String = String::from_utf8_lossy(body)
            .chars()
            .take(BODY_EXCERPT_LIMIT)
            .collect();
        let request_id = headers
            .get("x-request-id")
            .or_else(|| headers.get("x-github-request-id"))
            .cloned();

        let mut err = if status == 429 {
            let mut e = EngineError::rate_limit(format!(
                "'{connector}.{operation}' was rate limited (status 429)"
            ));
            if let Some(retry_after) = headers.get("retry-after") {
                e = e.with_metadata("retry_after", json!(retry_after));
            }
            e
        } else {
            EngineError::http(format!("HTTP {status} from '{connector}.{operation}'"))
        };

        err = err
            .with_metadata("status", json!(status))
            .with_metadata("body_excerpt", json!(excerpt));
        if let Some(request_id) = request_id {
            err = err.with_metadata("request_id", json!(request_id));
        }
        return Err(err);
    }

    Ok(serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::connector::HttpMethod;
    use maestro_types::error::ErrorKind;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    // -------------------------------------------------------------------
    // URL construction
    // -------------------------------------------------------------------

    #[test]
    fn test_build_url_substitutes_and_encodes() {
        let (url, params) = build_url(
            "https://api.github.com",
            "/repos/{owner}/{repo}/contents",
            &inputs(json!({"owner": "acme corp", "repo": "widgets"})),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme%20corp/widgets/contents"
        );
        assert!(params.contains("owner") && params.contains("repo"));
    }

    #[test]
    fn test_build_url_exactly_one_joining_slash() {
        for (base, path) in [
            ("https://api.example.com/", "/v1/items"),
            ("https://api.example.com", "v1/items"),
            ("https://api.example.com/", "v1/items"),
            ("https://api.example.com", "/v1/items"),
        ] {
            let (url, _) = build_url(base, path, &Map::new()).unwrap();
            assert_eq!(url.as_str(), "https://api.example.com/v1/items");
        }
    }

    #[test]
    fn test_build_url_missing_parameter() {
        let err = build_url(
            "https://api.example.com",
            "/items/{id}",
            &Map::new(),
        )
        .unwrap_err();
        assert!(err.message.contains("missing required parameter 'id'"));
    }

    #[test]
    fn test_build_url_traversal_rejected() {
        let err = build_url(
            "https://api.github.com",
            "/repos/{owner}/contents",
            &inputs(json!({"owner": "../../etc"})),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathInjection);
        assert!(err.message.contains("owner"));
    }

    #[test]
    fn test_build_url_numeric_parameter() {
        let (url, _) = build_url(
            "https://api.example.com",
            "/issues/{number}",
            &inputs(json!({"number": 42})),
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/issues/42");
    }

    #[test]
    fn test_build_url_object_parameter_rejected() {
        let err = build_url(
            "https://api.example.com",
            "/items/{id}",
            &inputs(json!({"id": {"nested": true}})),
        )
        .unwrap_err();
        assert!(err.message.contains("scalar"));
    }

    // -------------------------------------------------------------------
    // Body and defaults
    // -------------------------------------------------------------------

    #[test]
    fn test_body_excludes_path_params() {
        let all = inputs(json!({"owner": "acme", "title": "bug", "labels": ["p1"]}));
        let params = HashSet::from(["owner".to_string()]);
        let body = body_inputs(&all, &params);
        assert!(!body.contains_key("owner"));
        assert_eq!(body["title"], json!("bug"));
        assert_eq!(body["labels"], json!(["p1"]));
    }

    #[test]
    fn test_inject_defaults_only_when_missing() {
        let defaults = HashMap::from([
            ("per_page".to_string(), json!(30)),
            ("state".to_string(), json!("open")),
        ]);
        let merged = inject_defaults(inputs(json!({"state": "closed"})), &defaults);
        assert_eq!(merged["per_page"], json!(30));
        assert_eq!(merged["state"], json!("closed"));
    }

    // -------------------------------------------------------------------
    // Header merging
    // -------------------------------------------------------------------

    #[test]
    fn test_operation_headers_override_connector_headers() {
        let definition = ConnectorDefinition {
            name: "svc".to_string(),
            from: None,
            base_url: "https://svc.example.com".to_string(),
            auth: None,
            headers: HashMap::from([
                ("Accept".to_string(), "application/json".to_string()),
                ("X-Shared".to_string(), "base".to_string()),
            ]),
            rate_limit: None,
            default_fields: HashMap::new(),
            operations: HashMap::new(),
        };
        let operation = OperationDefinition {
            method: HttpMethod::Get,
            path: "/".to_string(),
            headers: HashMap::from([("X-Shared".to_string(), "op".to_string())]),
            timeout_secs: None,
            transform: None,
        };

        let merged = merged_headers(&definition, &operation);
        assert_eq!(merged["Accept"], "application/json");
        assert_eq!(merged["X-Shared"], "op");
    }

    // -------------------------------------------------------------------
    // Response classification
    // -------------------------------------------------------------------

    #[test]
    fn test_classify_json_body() {
        let value =
            classify_response("svc", "op", 200, &HashMap::new(), br#"{"ok": true}"#).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn test_classify_non_json_body_kept_as_string() {
        let value =
            classify_response("svc", "op", 200, &HashMap::new(), b"plain text").unwrap();
        assert_eq!(value, json!("plain text"));
    }

    #[test]
    fn test_classify_http_error_carries_details() {
        let headers = HashMap::from([(
            "x-github-request-id".to_string(),
            "ABCD:1234".to_string(),
        )]);
        let err = classify_response("github", "get_issue", 404, &headers, b"Not Found")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http);
        assert!(err.message.contains("404"));
        assert_eq!(err.metadata["status"], json!(404));
        assert_eq!(err.metadata["body_excerpt"], json!("Not Found"));
        assert_eq!(err.metadata["request_id"], json!("ABCD:1234"));
    }

    #[test]
    fn test_classify_429_is_rate_limit_with_retry_after() {
        let headers = HashMap::from([("retry-after".to_string(), "30".to_string())]);
        let err = classify_response("svc", "op", 429, &headers, b"slow down").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.metadata["retry_after"], json!("30"));
    }

    #[test]
    fn test_classify_body_excerpt_truncated() {
        let long_body = "x".repeat(2000);
        let err = classify_response("svc", "op", 500, &HashMap::new(), long_body.as_bytes())
            .unwrap_err();
        let excerpt = err.metadata["body_excerpt"].as_str().unwrap();
        assert_eq!(excerpt.len(), BODY_EXCERPT_LIMIT);
    }

    // -------------------------------------------------------------------
    // Executor-level guards (no network reached)
    // -------------------------------------------------------------------

    fn metadata_connector() -> ConnectorDefinition {
        ConnectorDefinition {
            name: "sneaky".to_string(),
            from: None,
            base_url: "http://169.254.169.254".to_string(),
            auth: None,
            headers: HashMap::new(),
            rate_limit: None,
            default_fields: HashMap::new(),
            operations: HashMap::from([(
                "probe".to_string(),
                OperationDefinition {
                    method: HttpMethod::Get,
                    path: "/latest/meta-data".to_string(),
                    headers: HashMap::new(),
                    timeout_secs: Some(1),
                    transform: None,
                },
            )]),
        }
    }

    #[tokio::test]
    async fn test_ssrf_blocked_before_any_network() {
        let config = EngineConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let connector = HttpConnector::new(metadata_connector(), &config).await.unwrap();
        let cancel = CancellationToken::new();

        let err = connector
            .execute("probe", &Map::new(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ssrf);
        assert!(err.message.contains("169.254.169.254"));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_not_found() {
        let config = EngineConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let connector = HttpConnector::new(metadata_connector(), &config).await.unwrap();
        let cancel = CancellationToken::new();

        let err = connector
            .execute("nope", &Map::new(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.suggestion.unwrap().contains("probe"));
    }
}
