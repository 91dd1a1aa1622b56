//! Process-wide engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default admission-semaphore capacity.
pub const DEFAULT_MAX_PARALLEL: usize = 10;

/// Default connector operation timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Process-wide engine configuration, loadable from `maestro.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently running workflows.
    pub max_parallel: usize,
    /// Default operation timeout in seconds when neither the operation nor
    /// the connector specifies one.
    pub default_timeout_secs: u64,
    /// Directory for persisted rate-limiter state.
    pub state_file_path: PathBuf,
    /// Whether to emit metrics.
    pub enable_metrics: bool,
    /// Host allow list for outbound connector requests. Empty means no
    /// allow-list restriction (block rules still apply).
    pub allowed_hosts: Vec<String>,
    /// Host/CIDR block list. Defaults to all private, loopback, link-local
    /// ranges and the cloud metadata endpoint.
    pub blocked_hosts: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            state_file_path: PathBuf::from("state"),
            enable_metrics: true,
            allowed_hosts: Vec::new(),
            blocked_hosts: default_blocked_hosts(),
        }
    }
}

/// The default block list: RFC1918, loopback, link-local (including the
/// cloud metadata endpoint), and the IPv6 equivalents.
pub fn default_blocked_hosts() -> Vec<String> {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "169.254.169.254",
        "::1/128",
        "fe80::/10",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
