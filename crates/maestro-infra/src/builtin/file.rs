//! Filesystem builtin connector, confined to configured allow-paths.
//!
//! Operations: `read`, `write`, `list`, `delete`, `exists`. Every
//! user-supplied path is normalized lexically (no `..` components), then
//! canonicalized so symlinks resolve, and the canonical path is
//! prefix-checked against the canonicalized allow roots; escapes are
//! `path-injection` errors.

use std::path::{Component, Path, PathBuf};

use futures_util::future::BoxFuture;
use maestro_core::connector::Connector;
use maestro_types::connector::OperationResult;
use maestro_types::error::EngineError;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::required_str;

/// Builtin connector for file operations under allow-listed roots.
pub struct FileConnector {
    allow_paths: Vec<PathBuf>,
}

impl FileConnector {
    /// Create a file connector allowed to touch the given roots.
    pub fn new(allow_paths: Vec<PathBuf>) -> Self {
        Self { allow_paths }
    }

    /// Resolve a user path: relative paths join the first allow root; `..`
    /// components are rejected, the path is canonicalized (resolving
    /// symlinks through its deepest existing ancestor), and the canonical
    /// result must sit under a canonicalized allow root. A symlink inside a
    /// root pointing outside it is an escape, not a valid target.
    async fn resolve(&self, raw: &str) -> Result<PathBuf, EngineError> {
        if raw.contains('\0') {
            return Err(EngineError::path_injection(
                "path contains a NUL byte".to_string(),
            ));
        }

        let candidate = Path::new(raw);
        let mut normalized = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::ParentDir => {
                    return Err(EngineError::path_injection(format!(
                        "path '{raw}' contains a traversal sequence ('..')"
                    )));
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        let resolved = if normalized.is_absolute() {
            normalized
        } else {
            let root = self.allow_paths.first().ok_or_else(|| {
                EngineError::validation("file connector has no allowed paths configured")
            })?;
            root.join(normalized)
        };

        let canonical = canonicalize_existing_prefix(&resolved).await?;

        let mut inside = false;
        for root in &self.allow_paths {
            let Ok(root) = tokio::fs::canonicalize(root).await else {
                continue;
            };
            if canonical.starts_with(&root) {
                inside = true;
                break;
            }
        }
        if !inside {
            return Err(EngineError::path_injection(format!(
                "path '{raw}' resolves outside the allowed paths"
            ))
            .with_suggestion("Check that the file path is correct"));
        }

        Ok(canonical)
    }

    async fn read(&self, path: &Path) -> Result<Value, EngineError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                EngineError::not_found(format!("file '{}' not found", path.display()))
            } else {
                EngineError::connection(format!("failed to read '{}': {err}", path.display()))
            }
        })?;
        Ok(json!({"path": path.display().to_string(), "content": content}))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<Value, EngineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        }))
    }

    async fn list(&self, path: &Path) -> Result<Value, EngineError> {
        let mut dir = tokio::fs::read_dir(path).await.map_err(|err| {
            EngineError::connection(format!("failed to list '{}': {err}", path.display()))
        })?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": file_type.is_dir(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(json!({"path": path.display().to_string(), "entries": entries}))
    }

    async fn delete(&self, path: &Path) -> Result<Value, EngineError> {
        let deleted = match tokio::fs::remove_file(path).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                return Err(EngineError::connection(format!(
                    "failed to delete '{}': {err}",
                    path.display()
                )));
            }
        };
        Ok(json!({"path": path.display().to_string(), "deleted": deleted}))
    }

    async fn exists(&self, path: &Path) -> Result<Value, EngineError> {
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        Ok(json!({"path": path.display().to_string(), "exists": exists}))
    }
}

/// Canonicalize a path that may not fully exist yet: resolve the deepest
/// existing ancestor (following symlinks) and rejoin the not-yet-created
/// tail. Non-existing components cannot be symlinks, so the result is the
/// path the filesystem would actually touch.
async fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, EngineError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match tokio::fs::canonicalize(&existing).await {
            Ok(mut canonical) => {
                for component in tail.iter().rev() {
                    canonical.push(component);
                }
                return Ok(canonical);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name() else {
                    return Err(EngineError::connection(format!(
                        "cannot canonicalize '{}'",
                        path.display()
                    )));
                };
                tail.push(name.to_os_string());
                existing = existing
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                if existing.as_os_str().is_empty() {
                    return Err(EngineError::connection(format!(
                        "cannot canonicalize '{}': no existing ancestor",
                        path.display()
                    )));
                }
            }
            Err(err) => {
                return Err(EngineError::connection(format!(
                    "failed to canonicalize '{}': {err}",
                    path.display()
                )));
            }
        }
    }
}

impl Connector for FileConnector {
    fn name(&self) -> &str {
        "file"
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
            let path = self.resolve(required_str(&inputs, "path")?).await?;
            let value = match operation.as_str() {
                "read" => self.read(&path).await?,
                "write" => {
                    let content = required_str(&inputs, "content")?;
                    self.write(&path, content).await?
                }
                "list" => self.list(&path).await?,
                "delete" => self.delete(&path).await?,
                "exists" => self.exists(&path).await?,
                other => {
                    return Err(EngineError::not_found(format!(
                        "file connector has no operation '{other}'"
                    ))
                    .with_suggestion("Known operations: read, write, list, delete, exists"));
                }
            };
            Ok(OperationResult::from_value(value))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
