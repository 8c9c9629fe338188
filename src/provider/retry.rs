// src/provider/retry.rs — Retry with exponential backoff for inference services
//
// Wraps any InferenceService with automatic retry on transient failures.
// Retries: rate limits (429), server errors (5xx), connection failures.
// Does NOT retry: bad requests, auth errors, malformed replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, InferenceService};
use crate::infra::config::RetrySettings;
use crate::infra::errors::EngineError;

const BACKOFF_FACTOR: f64 = 2.0;
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter_fraction: JITTER_FRACTION,
        }
    }
}

/// A service wrapper that retries `chat()` on transient errors.
///
/// Retries happen inside whatever budget the caller raced this call
/// against, so an expiring budget cancels the backoff sleep too.
pub struct RetryService {
    inner: Arc<dyn InferenceService>,
    config: RetryConfig,
}

impl RetryService {
    pub fn new(inner: Arc<dyn InferenceService>) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(inner: Arc<dyn InferenceService>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay for a given retry attempt (0-indexed).
    fn delay_for_attempt(&self, attempt: u32, rate_limit_delay: Option<Duration>) -> Duration {
        if let Some(rl_delay) = rate_limit_delay {
            return rl_delay + Duration::from_millis(100);
        }

        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(attempt, self.config.jitter_fraction);
        let final_ms = (capped_ms * jitter).max(50.0);

        Duration::from_millis(final_ms as u64)
    }
}

fn rate_limit_delay(error: &EngineError) -> Option<Duration> {
    match error {
        EngineError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Multiplier in [1 - fraction, 1 + fraction], reproducible per attempt.
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

#[async_trait]
impl InferenceService for RetryService {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, EngineError> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retriable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt, rate_limit_delay(&e));
                    tracing::warn!(
                        provider = self.inner.id(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
