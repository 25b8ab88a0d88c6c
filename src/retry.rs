//! Bounded exponential-backoff retry for remote operations.

use std::{future::Future, time::Duration};

use crate::config::RetryConfig;

/// Retry policy: `retries` additional attempts after the first failure,
/// waiting `base_delay * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            retries,
            base_delay,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.retries, Duration::from_millis(config.base_delay_ms))
    }
}

/// Run `op` with bounded exponential backoff, surfacing the last error once
/// every attempt is spent. Total attempts = retries + 1.
///
/// No error classification happens here; the caller decides whether a given
/// failure is queued for replay or rolled back.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.retries {
                    return Err(error);
                }
                tokio::time::sleep(policy.base_delay * 2u32.pow(attempt)).await;
                attempt += 1;
            }
        }
    }
}
