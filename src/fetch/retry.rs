use std::future::Future;

use tokio::time::Duration;

use super::error::{UpstreamError, UpstreamErrorType};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: Duration,
    pub retry_on_errors: Vec<UpstreamErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
            retry_on_errors: vec![UpstreamErrorType::RateLimited],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` once, then up to `max_retries` more times while it
    /// keeps failing with a retryable error. Backoff is fixed.
    pub async fn retry<F, Fut, T>(&self, operation: F) -> Result<T, UpstreamError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.should_retry(&error) || retries >= self.config.max_retries {
                        return Err(error);
                    }
                    retries += 1;

                    log::warn!(
                        "Upstream call failed (retry {}/{}): {}. Retrying in {:?}...",
                        retries,
                        self.config.max_retries,
                        error,
                        self.config.backoff
                    );

                    tokio::time::sleep(self.config.backoff).await;
                }
            }
        }
    }

    fn should_retry(&self, error: &UpstreamError) -> bool {
        self.config.retry_on_errors.contains(&error.error_type())
    }
}
