use std::{future::Future, time::Duration};

use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Timeout and retry policy applied to every chain request.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Factor applied to the delay after each retry
    pub backoff_multiplier: f64,
    /// Upper bound on a single attempt
    pub request_timeout: Duration,
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryConfig {
    /// Delay schedule for one request, starting at `base_delay` and growing by
    /// `backoff_multiplier` after each retry.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(self.backoff_multiplier.max(1.0))
            .with_randomization_factor(0.0)
            .with_max_interval(MAX_RETRY_DELAY)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::new_invalid_arg(anyhow::anyhow!(
                "request timeout must be positive"
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::new_invalid_arg(anyhow::anyhow!(
                "backoff multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Run `f` under the timeout of `config`, retrying transient failures with exponential backoff.
/// A timed out attempt counts as transient. Other errors are returned immediately.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = config.backoff();
    let mut retry = 0;
    loop {
        let result = match tokio::time::timeout(config.request_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(Error::new_transient(anyhow::anyhow!(
                "{operation} timed out after {:?}",
                config.request_timeout
            ))),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retry < config.max_retries => {
                let Some(delay) = backoff.next_backoff() else {
                    warn!(operation, attempts = retry + 1, %err, "chain request failed");
                    return Err(err);
                };
                debug!(operation, retry, ?delay, %err, "retrying chain request");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(err) => {
                warn!(operation, attempts = retry + 1, %err, "chain request failed");
                return Err(err);
            }
        }
    }
}
