//! Retry policy for capacity failures

use std::future::Future;

use keypool_core::Result;
use serde::{Deserialize, Serialize};

use super::backoff::BackoffStrategy;

/// How many times to retry a borrow and how long to wait in between
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = never retry)
    max_attempts: u32,
    backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, BackoffStrategy::default())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retries run out
    ///
    /// `operation` receives the zero-based attempt number.
    pub async fn execute<T, Op, Fut>(&self, mut operation: Op) -> Result<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(attempt, ?delay, error = %err, "retrying after capacity failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}
