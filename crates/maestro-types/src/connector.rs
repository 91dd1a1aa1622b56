//! Connector, operation, auth, and rate-limit descriptors.
//!
//! A connector is a named external integration: either a declarative HTTP
//! definition driven by the generic executor, or a builtin (file, shell,
//! transform, utility). Definitions are immutable once registered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Connector definition
// ---------------------------------------------------------------------------

/// A declarative HTTP connector definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDefinition {
    /// Connector name (registry key).
    pub name: String,
    /// Package reference this definition was loaded from, if any
    /// (e.g. `"github"` for the bundled GitHub package).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Base URL all operation paths are joined onto.
    pub base_url: String,
    /// Authentication descriptor. Secret fields may be `${ENV_VAR}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
    /// Connector-wide headers, applied before per-operation headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Rate-limit configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Well-known input fields injected with defaults when the caller
    /// omits them.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub default_fields: HashMap<String, Value>,
    /// Operations keyed by name.
    #[serde(default)]
    pub operations: HashMap<String, OperationDefinition>,
}

/// HTTP method for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Whether requests with this method carry a JSON body built from the
    /// non-path inputs.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named callable on a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefinition {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path template with `{name}` placeholders, joined onto the base URL.
    pub path: String,
    /// Per-operation headers, overriding connector-level ones.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Per-operation timeout in seconds (falls back to the connector
    /// default of 30s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Response-transform expression evaluated against the decoded body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Tagged authentication descriptor. All secret fields may be literal
/// values or `${ENV_VAR}` references resolved at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDescriptor {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// `Authorization: Basic base64(user:pass)`.
    Basic { username: String, password: String },
    /// Arbitrary header carrying the key.
    ApiKey { header: String, value: String },
    /// `Authorization: Bot <token>` (Discord-style).
    Bot { token: String },
    /// OAuth2 client-credentials flow. Declared for forward compatibility;
    /// applying it fails with `not-implemented`.
    Oauth2 {
        client_id: String,
        client_secret: String,
        token_url: String,
    },
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Token-bucket caps per dimension. Each dimension is optional; an absent
/// dimension is unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<f64>,
}

impl RateLimitConfig {
    /// Whether any dimension is configured.
    pub fn is_limited(&self) -> bool {
        self.per_second.is_some() || self.per_minute.is_some() || self.per_hour.is_some()
    }
}

// ---------------------------------------------------------------------------
// Operation result
// ---------------------------------------------------------------------------

/// Result of one connector operation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Post-transform value.
    pub response: Value,
    /// Pre-transform value, kept for debugging.
    pub raw_response: Value,
    /// HTTP status code (absent for builtin connectors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Response headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Call metadata (durations, rate-limit waits, retry-after).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl OperationResult {
    /// Build a result whose raw and transformed values are the same.
    pub fn from_value(value: Value) -> Self {
        Self {
            response: value.clone(),
            raw_response: value,
            status_code: None,
            headers: HashMap::new(),
            metadata: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
