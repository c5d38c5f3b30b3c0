use crate::config::CircuitBreakerConfig;
use crate::providers::base::{ChatRequest, LLMProvider, LLMResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open { .. } => write!(f, "Open"),
            Self::HalfOpen { successes } => write!(f, "HalfOpen({})", successes),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
}

pub struct CircuitBreakerProvider {
    inner: Arc<dyn LLMProvider>,
    breaker: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerProvider {
    pub fn wrap(
        inner: Arc<dyn LLMProvider>,
        config: &CircuitBreakerConfig,
    ) -> Arc<dyn LLMProvider> {
        Arc::new(Self {
            inner,
            breaker: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
            config: config.clone(),
        })
    }

    fn is_transient(error: &str) -> bool {
        let lower = error.to_lowercase();
        let transient_patterns = [
            "rate limit",
            "429",
            "500",
            "502",
            "503",
            "504",
            "timeout",
            "connection refused",
            "connection reset",
            "broken pipe",
        ];
        let non_transient_patterns = [
            "authentication",
            "unauthorized",
            "context length",
            "invalid api key",
            "invalid_api_key",
            "permission",
            "forbidden",
        ];

        // Non-transient errors take priority
        if non_transient_patterns.iter().any(|p| lower.contains(p)) {
            return false;
        }

        transient_patterns.iter().any(|p| lower.contains(p))
    }

    async fn should_allow(&self) -> Result<(), anyhow::Error> {
        let mut breaker = self.breaker.lock().await;
        match &breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen { .. } => Ok(()),
            CircuitState::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed.as_secs() >= self.config.recovery_timeout_secs {
                    info!(
                        "circuit breaker transitioning Open -> HalfOpen after {}s",
                        elapsed.as_secs()
                    );
                    breaker.state = CircuitState::HalfOpen { successes: 0 };
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "Circuit breaker is open ({}s remaining). Provider appears to be down.",
                        self.config.recovery_timeout_secs - elapsed.as_secs()
                    ))
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut breaker = self.breaker.lock().await;
        breaker.consecutive_failures = 0;
        if let CircuitState::HalfOpen { successes } = &breaker.state {
            let new_successes = successes + 1;
            if new_successes >= self.config.half_open_probes {
                info!(
                    "circuit breaker transitioning HalfOpen -> Closed after {} successful probes",
                    new_successes
                );
                breaker.state = CircuitState::Closed;
            } else {
                breaker.state = CircuitState::HalfOpen {
                    successes: new_successes,
                };
            }
        }
    }

    async fn record_failure(&self, is_transient: bool) {
        if !is_transient {
            return;
        }
        let mut breaker = self.breaker.lock().await;
        breaker.consecutive_failures += 1;
        let failures = breaker.consecutive_failures;

        match &breaker.state {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    warn!(
                        "circuit breaker tripped after {} consecutive failures: Closed -> Open",
                        failures
                    );
                    breaker.state = CircuitState::Open {
                        since: Instant::now(),
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                warn!("circuit breaker probe failed: HalfOpen -> Open");
                breaker.state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
            CircuitState::Open { .. } => {}
        }
    }
}

#[async_trait]
impl LLMProvider for CircuitBreakerProvider {
    async fn chat(&self, req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        self.should_allow().await?;

        match self.inner.chat(req).await {
            Ok(response) => {
                self.record_success().await;
                Ok(response)
            }
            Err(e) => {
                let error_str = e.to_string();
                let transient = Self::is_transient(&error_str);
                self.record_failure(transient).await;
                Err(e)
            }
        }
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn warmup(&self) -> anyhow::Result<()> {
        self.inner.warmup().await
    }
}
