//! Retry policy for provider calls
//!
//! Bounded attempts with binary exponential backoff and ±25% jitter.
//! Only transient failures (`RateLimited`, `Unavailable`) are retried; a
//! timeout already consumed its budget and is returned as-is.

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetryConfig;
use crate::errors::ProviderError;
use crate::providers::{call_with_timeout, Prompt, ProviderClient};
use crate::types::ProviderResponse;

/// Retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    max_attempts: u32,

    /// Base delay in milliseconds
    base_delay_ms: u64,

    /// Maximum delay cap in milliseconds
    max_delay_ms: u64,

    /// Enable jitter
    enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            enable_jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            enable_jitter: false,
        }
    }

    pub fn with_attempts(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: base_delay_ms.saturating_mul(8),
            enable_jitter: false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Call `client` until it succeeds, fails permanently, or attempts run
    /// out. `on_retry` fires before each backoff sleep.
    pub async fn call<F>(
        &self,
        client: &dyn ProviderClient,
        prompt: &Prompt,
        timeout: Duration,
        mut on_retry: F,
    ) -> ProviderResponse
    where
        F: FnMut(u32, &ProviderError),
    {
        let mut attempt = 1;
        let mut elapsed_ms = 0u64;

        loop {
            let mut response = call_with_timeout(client, prompt, timeout).await;
            elapsed_ms += response.latency_ms;

            let retry = match &response.outcome {
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    on_retry(attempt, error);
                    debug!(
                        provider = %client.kind(),
                        attempt,
                        error = %error,
                        "Retrying provider call"
                    );
                    true
                }
                _ => false,
            };

            if !retry {
                response.latency_ms = elapsed_ms;
                return response;
            }

            sleep(self.calculate_delay(attempt)).await;
            attempt += 1;
        }
    }

    /// Delay before attempt `attempt + 1`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential_delay = self.base_delay_ms.saturating_mul(2u64.pow(exponent));
        let delay_ms = exponential_delay.min(self.max_delay_ms);

        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Upper bound on total backoff across all attempts
    pub fn max_total_backoff(&self) -> Duration {
        let total_ms: u64 = (1..self.max_attempts)
            .map(|attempt| {
                let exponent = attempt.saturating_sub(1).min(16);
                let delay = self.base_delay_ms.saturating_mul(2u64.pow(exponent));
                delay.min(self.max_delay_ms) * 5 / 4
            })
            .sum();
        Duration::from_millis(total_ms)
    }
}
