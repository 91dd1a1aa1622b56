//! Connector registry and package loader.
//!
//! The registry resolves `connector.operation` references to live connector
//! instances. The package loader merges bundled (YAML) connector package
//! definitions with user-supplied overrides; a user definition can extend a
//! bundled package via its `from` reference.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use maestro_types::connector::ConnectorDefinition;
use maestro_types::error::EngineError;

use super::Connector;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Resolves connector names and `connector.operation` references.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its own name, replacing any previous one.
    pub fn register(&self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.name().to_string(), connector);
    }

    /// Look up a connector by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Registered connector names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolve a `connector.operation` reference.
    ///
    /// The operation part may itself contain dots; only the first segment
    /// names the connector.
    pub fn resolve(&self, reference: &str) -> Result<(Arc<dyn Connector>, String), EngineError> {
        let (connector_name, operation) = reference.split_once('.').ok_or_else(|| {
            EngineError::validation(format!(
                "connector reference '{reference}' must be 'connector.operation'"
            ))
        })?;

        let connector = self.get(connector_name).ok_or_else(|| {
            EngineError::not_found(format!("connector '{connector_name}' is not registered"))
                .with_suggestion(format!(
                    "Registered connectors: {}",
                    self.names().join(", ")
                ))
        })?;

        Ok((connector, operation.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Package loader
// ---------------------------------------------------------------------------

/// Merges bundled package definitions with user overrides.
pub struct PackageLoader {
    bundled: HashMap<String, ConnectorDefinition>,
}

impl PackageLoader {
    /// Build a loader over the bundled package definitions.
    pub fn new(bundled: Vec<ConnectorDefinition>) -> Self {
        Self {
            bundled: bundled.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Parse a YAML document containing a list of connector definitions.
    pub fn parse_package(yaml: &str) -> Result<Vec<ConnectorDefinition>, EngineError> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| EngineError::validation(format!("invalid connector package: {e}")))
    }

    /// A bundled definition by name.
    pub fn bundled(&self, name: &str) -> Option<&ConnectorDefinition> {
        self.bundled.get(name)
    }

    /// Resolve the effective definitions: every bundled package plus the
    /// user definitions, with user entries extending the bundled package
    /// their `from` field names (user fields win; maps merge).
    pub fn resolve_definitions(
        &self,
        user: Vec<ConnectorDefinition>,
    ) -> HashMap<String, ConnectorDefinition> {
        let mut effective = self.bundled.clone();

        for user_def in user {
            let merged = match user_def.from.as_deref().and_then(|f| self.bundled.get(f)) {
                Some(base) => merge_definitions(base, &user_def),
                None => user_def,
            };
            effective.insert(merged.name.clone(), merged);
        }

        effective
    }
}

/// Overlay `user` on `base`: scalar fields from the user win when set,
/// header/field/operation maps merge with user entries taking precedence.
fn merge_definitions(
    base: &ConnectorDefinition,
    user: &ConnectorDefinition,
) -> ConnectorDefinition {
    let mut merged = base.clone();
    merged.name = user.name.clone();
    merged.from = user.from.clone();

    if !user.base_url.is_empty() {
        merged.base_url = user.base_url.clone();
    }
    if user.auth.is_some() {
        merged.auth = user.auth.clone();
    }
    if user.rate_limit.is_some() {
        merged.rate_limit = user.rate_limit;
    }
    merged
        .headers
        .extend(user.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.default_fields.extend(
        user.default_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    merged.operations.extend(
        user.operations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
