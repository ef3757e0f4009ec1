//! Bounded retry for reads that race a recent write.
//!
//! A read right after session linking can miss the write it depends on.
//! `ReadRetry` re-reads a few times with linear backoff and then hands back
//! whatever it has, so callers degrade instead of blocking.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::DatabaseError;

/// Hard ceiling on attempts regardless of configuration.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct ReadRetry {
    attempts: u32,
    backoff: Duration,
}

impl ReadRetry {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.clamp(1, MAX_ATTEMPTS),
            backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before attempt `n` (1-based). The first attempt never waits.
    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }

    /// Retry `f` while it errors. Returns the last error once attempts run out.
    pub async fn read<T, F, Fut>(&self, label: &str, mut f: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(read = label, attempt, error = %e, "Read failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.delay_before(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Retry `f` until its value satisfies `accept`. Errors and unaccepted
    /// values share one attempt budget. After the last attempt the latest
    /// value is returned as-is, accepted or not.
    pub async fn read_until<T, F, Fut, P>(
        &self,
        label: &str,
        mut f: F,
        accept: P,
    ) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
        P: Fn(&T) -> bool,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) if accept(&value) || attempt >= self.attempts => return Ok(value),
                Ok(_) => {
                    tracing::warn!(read = label, attempt, "Read not yet visible, retrying");
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(read = label, attempt, error = %e, "Read failed, retrying");
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
            tokio::time::sleep(self.delay_before(attempt)).await;
        }
    }
}

impl From<&RetryConfig> for ReadRetry {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, config.backoff)
    }
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
