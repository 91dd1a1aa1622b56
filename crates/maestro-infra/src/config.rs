//! Engine configuration loader.
//!
//! Reads `maestro.toml` from the data directory and deserializes it into
//! [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed (with a warning), so a bad edit never prevents startup.

use std::path::{Path, PathBuf};

use maestro_types::config::EngineConfig;

/// The engine's default data directory (`~/.maestro`).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".maestro")
}

/// Load engine configuration from `{data_dir}/maestro.toml`.
///
/// - Missing file: defaults.
/// - Unparseable file: warning plus defaults.
/// - A relative `state_file_path` is anchored under the data directory.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("maestro.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no maestro.toml at {}, using defaults", config_path.display());
            return anchored(EngineConfig::default(), data_dir);
        }
        Err(err) => {
            tracing::warn!(
                "failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return anchored(EngineConfig::default(), data_dir);
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => anchored(config, data_dir),
        Err(err) => {
            tracing::warn!(
                "failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            anchored(EngineConfig::default(), data_dir)
        }
    }
}

fn anchored(mut config: EngineConfig, data_dir: &Path) -> EngineConfig {
    if config.state_file_path.is_relative() {
        config.state_file_path = data_dir.join(&config.state_file_path);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_engine_config(dir.path()).await;
        assert_eq!(config.max_parallel, 10);
        assert_eq!(config.state_file_path, dir.path().join("state"));
    }

    #[tokio::test]
    async fn test_valid_toml_parsed() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("maestro.toml"),
            r#"
max_parallel = 4
default_timeout_secs = 10
allowed_hosts = ["api.github.com", "*.example.com"]
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(dir.path()).await;
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.default_timeout_secs, 10);
        assert_eq!(config.allowed_hosts.len(), 2);
        // Unspecified fields keep defaults.
        assert!(!config.blocked_hosts.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_toml_falls_back() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("maestro.toml"), "max_parallel = [broken")
            .await
            .unwrap();
        let config = load_engine_config(dir.path()).await;
        assert_eq!(config.max_parallel, 10);
    }

    #[tokio::test]
    async fn test_absolute_state_path_untouched() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("maestro.toml"),
            r#"state_file_path = "/var/lib/maestro/state""#,
        )
        .await
        .unwrap();
        let config = load_engine_config(dir.path()).await;
        assert_eq!(
            config.state_file_path,
            PathBuf::from("/var/lib/maestro/state")
        );
    }
}
