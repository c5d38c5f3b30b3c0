//! Outbound Delivery Pipeline.
//!
//! Sits between the bus's outbound queue and the [`ChannelManager`]: bounds
//! concurrency, deduplicates retried sends by `(channel, chat_id, request_id)`,
//! enforces a minimum gap between sends, and retries transient failures with
//! exponential backoff — but only for channels known to be flaky in practice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::bus::OutboundMessage;
use crate::channels::manager::ChannelManager;
use crate::runtime_metrics::RuntimeMetrics;

/// Channels whose transient failures are worth retrying. Others (e.g. `http`,
/// `whatsapp`, `twilio`) fail fast — either they don't have flaky upstreams in
/// practice, or a retry would re-trigger side effects the target can't dedup.
const RETRYABLE_CHANNELS: &[&str] = &["telegram", "discord", "slack"];

#[derive(Debug, Clone)]
pub struct OutboundPipelineConfig {
    pub max_concurrent_sends: usize,
    pub retry_max_attempts: u32,
    pub retry_base_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub rate_limit_per_second: f64,
    pub dedup_window: Duration,
}

impl Default for OutboundPipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 16,
            retry_max_attempts: 3,
            retry_base_backoff: Duration::from_millis(200),
            retry_max_backoff: Duration::from_secs(2),
            rate_limit_per_second: 20.0,
            dedup_window: Duration::from_secs(30),
        }
    }
}

/// Bounded-concurrency sender with retry/backoff, rate limiting, and
/// request-id dedup. One instance serves the whole gateway process.
pub struct OutboundPipeline {
    config: OutboundPipelineConfig,
    semaphore: Arc<Semaphore>,
    dedup: Mutex<HashMap<String, Instant>>,
    last_send: Mutex<Option<Instant>>,
    metrics: Arc<RuntimeMetrics>,
}

impl OutboundPipeline {
    pub fn new(config: OutboundPipelineConfig, metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_sends.max(1))),
            config,
            dedup: Mutex::new(HashMap::new()),
            last_send: Mutex::new(None),
            metrics,
        }
    }

    fn prune_dedup(&self, dedup: &mut HashMap<String, Instant>) {
        let window = self.config.dedup_window;
        dedup.retain(|_, seen_at| seen_at.elapsed() < window);
    }

    /// Enforce `1 / rate_limit_per_second` minimum gap between sends across
    /// the whole pipeline (not per-channel — a single shared clock, per spec).
    async fn rate_limit_wait(&self) {
        if self.config.rate_limit_per_second <= 0.0 {
            return;
        }
        let min_gap = Duration::from_secs_f64(1.0 / self.config.rate_limit_per_second);
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_gap {
                tokio::time::sleep(min_gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_backoff.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = base.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.config.retry_max_backoff)
    }

    /// Deliver a single outbound message through the bounded-concurrency,
    /// deduplicated, rate-limited, retried path described in the outbound
    /// delivery spec. Acquires a concurrency permit for the duration of the
    /// (possibly multi-attempt) send.
    pub async fn send(&self, channels: &ChannelManager, msg: OutboundMessage) -> anyhow::Result<()> {
        let key = msg.dedup_key();
        {
            let mut dedup = self.dedup.lock().await;
            self.prune_dedup(&mut dedup);
            if dedup.contains_key(&key) {
                debug!("dropping duplicate outbound message: {}", key);
                return Ok(());
            }
            dedup.insert(key.clone(), Instant::now());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("outbound pipeline semaphore never closes");

        let retryable = RETRYABLE_CHANNELS.contains(&msg.channel.as_str());
        let max_attempts = if retryable {
            self.config.retry_max_attempts.max(1)
        } else {
            1
        };

        let mut last_err = None;
        for attempt in 1..=max_attempts {
            self.rate_limit_wait().await;
            self.metrics.record_channel_send_attempt(&msg.channel).await;

            match channels.send(&msg).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.metrics.record_channel_send_failure(&msg.channel).await;
                    warn!(
                        "outbound send failed (attempt {}/{}) for {}: {}",
                        attempt, max_attempts, key, e
                    );
                    last_err = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff_for_attempt(attempt)).await;
                    }
                }
            }
        }

        // Exhausted retries: release the tentative dedup key so an upstream
        // retry of this same request_id is not silently swallowed.
        self.dedup.lock().await.remove(&key);

        let attempts = max_attempts;
        Err(anyhow::anyhow!(
            "final send failure after {} attempt(s): {}",
            attempts,
            last_err.expect("loop always records an error before exhausting")
        ))
    }
}
