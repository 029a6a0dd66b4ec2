//! Bounded retry with a configurable backoff.
//!
//! One [`RetryPolicy`] guards metadata-store creation during a rebuild
//! (fixed delay, a locked database file usually frees up quickly) and another
//! guards each embedding batch (exponential, remote providers rate-limit).
//! Only errors for which [`RagError::is_retryable`] holds are retried.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base`, `2 × base`, `4 × base`, ... capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32 << retry.saturating_sub(1).min(16);
                base.saturating_mul(factor).min(max)
            }
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "{} failed, retrying",
                        what
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(
                            attempts = attempt,
                            error = %err,
                            "{} failed after exhausting retries",
                            what
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::Fixed(Duration::from_secs(2)))
    }
}

/// Convenience for callers that only need to know the error was terminal.
pub fn exhausted(what: &str, err: RagError) -> RagError {
    match err {
        RagError::Embedding { message, .. } => {
            RagError::embedding_permanent(format!("{}: {}", what, message))
        }
        other => other,
    }
}
