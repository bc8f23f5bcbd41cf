//! Retry with clamped exponential backoff.

use std::future::Future;
use std::time::Duration;

use pyvet_core::config::BackendConfig;
use pyvet_core::BackendError;
use tracing::warn;

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one; never below 1.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_backoff: Duration::from_secs(config.backoff_min_secs),
            max_backoff: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// A policy that never retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sleep before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let secs = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_secs(secs).clamp(self.min_backoff, self.max_backoff.max(self.min_backoff))
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only [`BackendError::is_transient`] failures are retried. `op` receives
/// the 1-based attempt number.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, mut op: F) -> Result<T, BackendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, max_attempts, delay_secs = delay.as_secs(), error = %err, "retrying inference request");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
