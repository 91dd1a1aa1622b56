//! Dry-run URL reachability probe.
//!
//! Answers "does a HEAD request get any response at all" with a hard 2 s
//! cap. Any HTTP status counts as reachable; transport failures do not.

use std::time::Duration;

use futures_util::future::BoxFuture;
use maestro_core::runner::dry_run::{PROBE_TIMEOUT, ReachabilityProbe};
use maestro_types::error::EngineError;

/// HEAD-request reachability probe over `reqwest`.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent("maestro-probe/0.1")
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build probe client: {e}")))?;
        Ok(Self { client })
    }

    /// Probe with an explicit timeout (tests shrink it).
    pub fn with_timeout(timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent("maestro-probe/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build probe client: {e}")))?;
        Ok(Self { client })
    }
}

impl ReachabilityProbe for HttpProbe {
    fn head(&self, url: &str) -> BoxFuture<'_, Result<bool, EngineError>> {
        let url = url.to_string();
        Box::pin(async move {
            match self.client.head(&url).send().await {
                Ok(_) => Ok(true),
                Err(err) => {
                    tracing::debug!(url = url.as_str(), error = %err, "probe failed");
                    Ok(false)
                }
            }
        })
    }
}
