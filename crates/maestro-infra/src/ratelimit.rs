//! Persisted token-bucket rate limiter.
//!
//! One limiter per connector, with a logical bucket per configured
//! dimension (second/minute/hour). Acquire waits until every configured
//! bucket holds at least one token, then consumes one from each. Refill is
//! continuous at the configured rate. Waiting is cancellable; cancellation
//! consumes nothing.
//!
//! State survives restarts in `<state-dir>/<connector>.json`:
//! `{"buckets": {"second": n, "minute": n, "hour": n}, "last_refill": <unix-ns>}`.
//! A missing or corrupt file starts from full buckets and logs once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use maestro_types::connector::RateLimitConfig;
use maestro_types::error::EngineError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
}

impl Bucket {
    fn full(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
        }
    }

    fn refill(&mut self, elapsed_secs: f64) {
        self.tokens = (self.tokens + elapsed_secs * self.refill_per_sec).min(self.capacity);
    }

    /// Seconds until one token is available.
    fn wait_secs(&self) -> f64 {
        if self.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.tokens) / self.refill_per_sec
        }
    }
}

#[derive(Debug)]
struct Buckets {
    second: Option<Bucket>,
    minute: Option<Bucket>,
    hour: Option<Bucket>,
    last_refill_ns: i64,
}

impl Buckets {
    fn configured(&mut self) -> impl Iterator<Item = &mut Bucket> {
        [
            self.second.as_mut(),
            self.minute.as_mut(),
            self.hour.as_mut(),
        ]
        .into_iter()
        .flatten()
    }

    fn refill_to(&mut self, now_ns: i64) {
        let elapsed = (now_ns - self.last_refill_ns).max(0) as f64 / 1e9;
        for bucket in self.configured() {
            bucket.refill(elapsed);
        }
        self.last_refill_ns = now_ns;
    }
}

// ---------------------------------------------------------------------------
// Persisted form
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    buckets: BTreeMap<String, f64>,
    last_refill: i64,
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Token-bucket limiter for one connector, persisted across restarts.
pub struct RateLimiter {
    connector: String,
    state_path: PathBuf,
    inner: Mutex<Buckets>,
}

impl RateLimiter {
    /// Build a limiter, restoring persisted tokens from the state dir.
    pub async fn load(connector: &str, config: RateLimitConfig, state_dir: &Path) -> Self {
        let state_path = state_dir.join(format!("{connector}.json"));
        let mut buckets = Buckets {
            second: config.per_second.map(|n| Bucket::full(n, n)),
            minute: config.per_minute.map(|n| Bucket::full(n, n / 60.0)),
            hour: config.per_hour.map(|n| Bucket::full(n, n / 3600.0)),
            last_refill_ns: now_ns(),
        };

        match tokio::fs::read(&state_path).await {
            Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(saved) => {
                    restore(&mut buckets, &saved);
                    tracing::debug!(connector, "restored rate-limit state");
                }
                Err(err) => {
                    tracing::warn!(
                        connector,
                        error = %err,
                        "corrupt rate-limit state, starting from full buckets"
                    );
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    connector,
                    error = %err,
                    "unreadable rate-limit state, starting from full buckets"
                );
            }
        }

        Self {
            connector: connector.to_string(),
            state_path,
            inner: Mutex::new(buckets),
        }
    }

    /// Wait until every configured bucket has a token, consume one from
    /// each, and persist. Returns how long the caller waited.
    ///
    /// Cancellation during the wait returns the cancellation marker without
    /// consuming tokens.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Duration, EngineError> {
        let started = tokio::time::Instant::now();

        loop {
            let wait_secs = {
                let mut buckets = self.inner.lock().await;
                buckets.refill_to(now_ns());

                let wait_secs = buckets
                    .configured()
                    .map(|b| b.wait_secs())
                    .fold(0.0_f64, f64::max);

                if wait_secs <= 0.0 {
                    for bucket in buckets.configured() {
                        bucket.tokens -= 1.0;
                    }
                    let snapshot = persisted(&buckets);
                    drop(buckets);
                    self.persist(&snapshot).await;
                    return Ok(started.elapsed());
                }
                wait_secs
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::cancelled()),
                _ = tokio::time::sleep(Duration::from_secs_f64(wait_secs)) => {}
            }
        }
    }

    async fn persist(&self, state: &PersistedState) {
        if let Some(parent) = self.state_path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(connector = self.connector.as_str(), error = %err, "rate-limit state dir");
                return;
            }
        }
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(connector = self.connector.as_str(), error = %err, "rate-limit state encode");
                return;
            }
        };
        if let Err(err) = tokio::fs::write(&self.state_path, bytes).await {
            tracing::warn!(
                connector = self.connector.as_str(),
                error = %err,
                "rate-limit state write failed"
            );
        }
    }
}

fn persisted(buckets: &Buckets) -> PersistedState {
    let mut map = BTreeMap::new();
    if let Some(b) = &buckets.second {
        map.insert("second".to_string(), b.tokens);
    }
    if let Some(b) = &buckets.minute {
        map.insert("minute".to_string(), b.tokens);
    }
    if let Some(b) = &buckets.hour {
        map.insert("hour".to_string(), b.tokens);
    }
    PersistedState {
        buckets: map,
        last_refill: buckets.last_refill_ns,
    }
}

fn restore(buckets: &mut Buckets, saved: &PersistedState) {
    let entries = [
        ("second", &mut buckets.second),
        ("minute", &mut buckets.minute),
        ("hour", &mut buckets.hour),
    ];
    for (key, slot) in entries {
        if let (Some(bucket), Some(tokens)) = (slot.as_mut(), saved.buckets.get(key)) {
            bucket.tokens = tokens.clamp(0.0, bucket.capacity);
        }
    }
    buckets.last_refill_ns = saved.last_refill;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn per_second(n: f64) -> RateLimitConfig {
        RateLimitConfig {
            per_second: Some(n),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unlimited_acquires_immediately() {
        let dir = TempDir::new().unwrap();
        let limiter =
            RateLimiter::load("free", RateLimitConfig::default(), dir.path()).await;
        let cancel = CancellationToken::new();

        for _ in 0..50 {
            let waited = limiter.acquire(&cancel).await.unwrap();
            assert!(waited < Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn test_burst_then_wait() {
        let dir = TempDir::new().unwrap();
        let limiter = RateLimiter::load("burst", per_second(2.0), dir.path()).await;
        let cancel = CancellationToken::new();

        // Two tokens available immediately.
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        // The third must wait about half a second (refill 2/s).
        let waited = limiter.acquire(&cancel).await.unwrap();
        assert!(waited >= Duration::from_millis(300), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_cancellation_during_wait() {
        let dir = TempDir::new().unwrap();
        let limiter = RateLimiter::load("cancelme", per_second(1.0), dir.path()).await;
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child.cancel();
        });

        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_state_persists_across_restart() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();

        {
            let limiter = RateLimiter::load("persist", per_second(1.0), dir.path()).await;
            limiter.acquire(&cancel).await.unwrap();
        }

        // Restart within the same second: the restored bucket is empty, so
        // the next acquire waits for the remaining refill.
        let limiter = RateLimiter::load("persist", per_second(1.0), dir.path()).await;
        let started = tokio::time::Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert!(
            started.elapsed() >= Duration::from_millis(200),
            "elapsed {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_state_file_format() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let limiter = RateLimiter::load("fmt", per_second(5.0), dir.path()).await;
        limiter.acquire(&cancel).await.unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("fmt.json"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["buckets"]["second"].is_number());
        assert!(parsed["last_refill"].is_i64());
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_full() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();

        let limiter = RateLimiter::load("broken", per_second(1.0), dir.path()).await;
        let cancel = CancellationToken::new();
        let waited = limiter.acquire(&cancel).await.unwrap();
        assert!(waited < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_multi_dimension_waits_for_slowest() {
        let dir = TempDir::new().unwrap();
        let config = RateLimitConfig {
            per_second: Some(100.0),
            per_minute: Some(60.0),
            per_hour: None,
        };
        let limiter = RateLimiter::load("multi", config, dir.path()).await;
        let cancel = CancellationToken::new();

        // 60/min refills one token per second; drain the minute bucket a
        // little and confirm the wait is driven by it, not the second one.
        for _ in 0..60 {
            limiter.acquire(&cancel).await.unwrap();
        }
        let waited = limiter.acquire(&cancel).await.unwrap();
        assert!(waited >= Duration::from_millis(300), "waited {waited:?}");
    }
}
