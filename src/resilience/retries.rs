//! Retry logic.
//!
//! # Responsibilities
//! - Execute a fallible async operation with exponential backoff + jitter
//! - Bound the number of attempts
//!
//! # Design Decisions
//! - Jittered backoff prevents thundering herd against the provisioner
//! - The last error is returned with the attempt count so callers can
//!   report exactly what gave up

use std::fmt;
use std::future::Future;

use crate::config::ControllerConfig;
use crate::resilience::backoff::calculate_backoff;

/// Attempt budget and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<&ControllerConfig> for RetryPolicy {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            max_attempts: config.launch_max_attempts.max(1),
            base_delay_ms: config.backoff_base_ms,
            max_delay_ms: config.backoff_max_ms,
        }
    }
}

/// Every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.error)
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is used up.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt >= policy.max_attempts => {
                tracing::warn!(operation, attempts = attempt, error = %error, "Giving up");
                return Err(Exhausted {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::info!(operation, attempt, delay = ?delay, error = %error, "Retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
