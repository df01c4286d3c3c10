//! The single retry utility used at the orchestrator boundary.
//!
//! A [`RetryPolicy`] runs an operation up to `max_attempts` times with a
//! fixed delay in between. The caller supplies the classification: only
//! errors it marks retryable are attempted again. Shutdown cuts the delay
//! short and ends the attempts.

use std::future::Future;
use std::time::Duration;

use crate::shutdown::ShutdownSignal;

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The error was not retryable.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The final error.
        last: E,
    },

    /// Shutdown was requested between attempts.
    #[error("interrupted by shutdown: {0}")]
    Interrupted(E),
}

impl<E> RetryError<E> {
    /// The underlying error, whatever the reason for giving up.
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } | Self::Interrupted(e) => e,
        }
    }
}

/// Bounded attempts with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// A policy with the given limits. Zero attempts is treated as one.
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        shutdown: &ShutdownSignal,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(operation = label, attempts = attempt, error = %e, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    tracing::debug!(operation = label, attempt, error = %e, "Transient failure, retrying");
                    if shutdown.sleep(self.delay).await {
                        return Err(RetryError::Interrupted(e));
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
