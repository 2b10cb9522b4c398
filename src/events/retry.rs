//! Retry policy with exponential backoff
//!
//! - Attempts: 3 (the first call included)
//! - Backoff: 2s, 4s, ... capped at 10s, with ±25% jitter kept inside
//!   the same 2s..10s window
//! - Only transient errors are retried

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::errors::{RagError, Result};

/// Default number of attempts
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry
const BASE_DELAY_MS: u64 = 2_000;

/// Maximum delay between attempts
const MAX_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            enable_jitter: true,
        }
    }

    /// Custom attempt count and delays, without jitter
    pub fn with_config(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
            enable_jitter: false,
        }
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of
    /// attempts. The last error is returned.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay after the given failed attempt (1-based)
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let delay_ms = exponential.min(self.max_delay_ms);

        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as f64;
            let offset = (rand::random::<f64>() * 2.0 - 1.0) * jitter;
            let floor = self.base_delay_ms.min(self.max_delay_ms);
            ((delay_ms as f64 + offset).max(0.0) as u64).clamp(floor, self.max_delay_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Transient failures are worth another attempt; bad input is not
pub fn is_retryable(error: &RagError) -> bool {
    match error {
        RagError::UpstreamTimeout { .. } => true,
        RagError::UpstreamFailure(_) => true,
        RagError::PersistenceFailure(_) => true,
        RagError::Io(_) => true,

        RagError::ValidationError(_) => false,
        RagError::NotFound { .. } => false,
        RagError::DimensionMismatch { .. } => false,
        RagError::Serialization(_) => false,
    }
}
