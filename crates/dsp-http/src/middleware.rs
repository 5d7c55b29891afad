//! HTTP middleware for retry logic

use std::time::Duration;

use tracing::{debug, warn};

use crate::{error::HttpError, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts after the first try
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for given attempt number
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Retry middleware for HTTP operations
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    /// Create new retry middleware
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable
    /// error, or the attempt budget is spent. The closure receives the
    /// zero-based attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Request succeeded after {attempt} retries");
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("Non-retryable error: {e}");
                    return Err(e);
                }
                Err(e) if attempt >= self.config.max_attempts => {
                    return Err(HttpError::RetryLimitExceeded {
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.config.calculate_delay(attempt);
                    warn!(
                        "Request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        self.config.max_attempts + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
