//! Process-wide runtime counters (tool calls, channel sends, latency buckets),
//! persisted atomically to `<workspace>/state/runtime_metrics.json` so a
//! restart does not lose the operator's view of recent activity.
//!
//! Kept as an explicit dependency passed into the agent loop / outbound
//! pipeline rather than a global singleton, per the "no global mutable
//! state" design note.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::utils::atomic_write;

/// Upper bound (ms) of each latency histogram bucket, mirroring the default
/// buckets `metrics_exporter_prometheus` ships with.
const LATENCY_BUCKETS_MS: &[u64] = &[50, 100, 250, 500, 1000, 2500, 5000, 10000];

fn bucket_label(latency_ms: u64) -> &'static str {
    for &boundary in LATENCY_BUCKETS_MS {
        if latency_ms <= boundary {
            return bucket_name(boundary);
        }
    }
    "+Inf"
}

fn bucket_name(boundary: u64) -> &'static str {
    match boundary {
        50 => "50",
        100 => "100",
        250 => "250",
        500 => "500",
        1000 => "1000",
        2500 => "2500",
        5000 => "5000",
        10000 => "10000",
        _ => "+Inf",
    }
}

/// Serializable snapshot of cumulative counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub tool_total: u64,
    pub tool_errors: u64,
    pub tool_timeouts: u64,
    pub latency_buckets_ms: HashMap<String, u64>,
    pub channel_send_attempts: HashMap<String, u64>,
    pub channel_send_failures: HashMap<String, u64>,
}

/// Live, process-scoped counters. Cheap to clone (all fields are `Arc`-free
/// atomics/mutexes behind `&self`); share via `Arc<RuntimeMetrics>`.
pub struct RuntimeMetrics {
    path: Option<PathBuf>,
    tool_total: AtomicU64,
    tool_errors: AtomicU64,
    tool_timeouts: AtomicU64,
    latency_buckets: Mutex<HashMap<String, u64>>,
    channel_send_attempts: Mutex<HashMap<String, u64>>,
    channel_send_failures: Mutex<HashMap<String, u64>>,
}

impl RuntimeMetrics {
    /// In-memory only; nothing is persisted. Useful for tests and `golem chat`.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tool_total: AtomicU64::new(0),
            tool_errors: AtomicU64::new(0),
            tool_timeouts: AtomicU64::new(0),
            latency_buckets: Mutex::new(HashMap::new()),
            channel_send_attempts: Mutex::new(HashMap::new()),
            channel_send_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Load prior counters from `path` if present, otherwise start at zero.
    /// Every mutation is persisted back to the same path.
    pub fn load(path: PathBuf) -> Result<Self> {
        let mut metrics = Self::in_memory();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let snapshot: RuntimeSnapshot = serde_json::from_str(&content)?;
            metrics.tool_total = AtomicU64::new(snapshot.tool_total);
            metrics.tool_errors = AtomicU64::new(snapshot.tool_errors);
            metrics.tool_timeouts = AtomicU64::new(snapshot.tool_timeouts);
            metrics.latency_buckets = Mutex::new(snapshot.latency_buckets_ms);
            metrics.channel_send_attempts = Mutex::new(snapshot.channel_send_attempts);
            metrics.channel_send_failures = Mutex::new(snapshot.channel_send_failures);
        }
        metrics.path = Some(path);
        Ok(metrics)
    }

    pub fn default_path(workspace: &std::path::Path) -> PathBuf {
        workspace.join("state").join("runtime_metrics.json")
    }

    pub async fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            tool_total: self.tool_total.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            tool_timeouts: self.tool_timeouts.load(Ordering::Relaxed),
            latency_buckets_ms: self.latency_buckets.lock().await.clone(),
            channel_send_attempts: self.channel_send_attempts.lock().await.clone(),
            channel_send_failures: self.channel_send_failures.lock().await.clone(),
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.path else { return };
        let snapshot = self.snapshot().await;
        if let Ok(content) = serde_json::to_string_pretty(&snapshot)
            && let Err(e) = atomic_write(path, &content)
        {
            tracing::warn!("failed to persist runtime metrics: {}", e);
        }
    }

    /// Record one successful or failed tool execution, plus its latency bucket.
    pub async fn record_tool_execution(&self, is_error: bool, latency_ms: u64) {
        self.tool_total.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.tool_errors.fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut buckets = self.latency_buckets.lock().await;
            *buckets.entry(bucket_label(latency_ms).to_string()).or_insert(0) += 1;
        }
        self.persist().await;
    }

    pub async fn record_tool_timeout(&self) {
        self.tool_total.fetch_add(1, Ordering::Relaxed);
        self.tool_timeouts.fetch_add(1, Ordering::Relaxed);
        self.persist().await;
    }

    pub async fn record_channel_send_attempt(&self, channel: &str) {
        {
            let mut attempts = self.channel_send_attempts.lock().await;
            *attempts.entry(channel.to_string()).or_insert(0) += 1;
        }
        self.persist().await;
    }

    pub async fn record_channel_send_failure(&self, channel: &str) {
        {
            let mut failures = self.channel_send_failures.lock().await;
            *failures.entry(channel.to_string()).or_insert(0) += 1;
        }
        self.persist().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tool_total_increments_by_one_per_execution() {
        let m = RuntimeMetrics::in_memory();
        m.record_tool_execution(false, 10).await;
        assert_eq!(m.snapshot().await.tool_total, 1);
        m.record_tool_execution(true, 10).await;
        assert_eq!(m.snapshot().await.tool_total, 2);
        assert_eq!(m.snapshot().await.tool_errors, 1);
    }

    #[tokio::test]
    async fn timeouts_counted_distinctly_from_errors() {
        let m = RuntimeMetrics::in_memory();
        m.record_tool_timeout().await;
        let snap = m.snapshot().await;
        assert_eq!(snap.tool_timeouts, 1);
        assert_eq!(snap.tool_errors, 0);
        assert_eq!(snap.tool_total, 1);
    }

    #[tokio::test]
    async fn latency_bucketing_picks_smallest_fit() {
        assert_eq!(bucket_label(10), "50");
        assert_eq!(bucket_label(50), "50");
        assert_eq!(bucket_label(51), "100");
        assert_eq!(bucket_label(20000), "+Inf");
    }

    #[tokio::test]
    async fn persists_and_reloads_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_metrics.json");
        {
            let m = RuntimeMetrics::load(path.clone()).unwrap();
            m.record_tool_execution(false, 10).await;
            m.record_channel_send_attempt("telegram").await;
        }
        let reloaded = RuntimeMetrics::load(path).unwrap();
        let snap = reloaded.snapshot().await;
        assert_eq!(snap.tool_total, 1);
        assert_eq!(snap.channel_send_attempts.get("telegram"), Some(&1));
    }

    #[tokio::test]
    async fn channel_send_failure_tracked_per_channel() {
        let m = RuntimeMetrics::in_memory();
        m.record_channel_send_attempt("telegram").await;
        m.record_channel_send_attempt("telegram").await;
        m.record_channel_send_failure("telegram").await;
        let snap = m.snapshot().await;
        assert_eq!(snap.channel_send_attempts.get("telegram"), Some(&2));
        assert_eq!(snap.channel_send_failures.get("telegram"), Some(&1));
    }
}
