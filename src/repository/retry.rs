//! Retry with exponential backoff for idempotent reads

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: usize,
    /// Base delay for exponential backoff, in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between attempts, in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to retry delays
    pub jitter_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryConfig {
    /// A config that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Runs an operation until it succeeds, fails permanently or runs out of attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute_with_retry<F, Fut, T>(&self, what: &str, operation: F) -> SyncResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        debug!("{} failed with non-retryable error: {}", what, error);
                        return Err(error);
                    }

                    if attempt >= max_attempts {
                        warn!("{} failed after {} attempts, last error: {}", what, attempt, error);
                        return Err(error);
                    }

                    let delay = self.calculate_delay(attempt, &error);
                    warn!(
                        "{} failed (attempt {}), retrying in {:?}: {}",
                        what, attempt, delay, error
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Calculate delay for next retry attempt
    fn calculate_delay(&self, attempt: usize, error: &SyncError) -> Duration {
        // Rate limiting asks for a longer pause than the usual backoff
        let base = match error {
            SyncError::Status { status: 429, .. } => self.config.base_delay() * 4,
            _ => self.config.base_delay(),
        };

        let delay_ms = (base.as_millis() as f64
            * self.config.backoff_multiplier.powi((attempt - 1) as i32)) as u64;

        let mut delay = std::cmp::min(Duration::from_millis(delay_ms), self.config.max_delay());

        if self.config.jitter_enabled {
            delay = add_jitter(delay);
        }

        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Add up to ±10% random jitter so parallel retries spread out
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;

    let jitter_range = delay.as_millis() as f64 * 0.1;
    if jitter_range <= 0.0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);

    let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0) as u64;
    Duration::from_millis(adjusted_ms)
}
