//! Exponential backoff for remote calls.
//!
//! Only transient errors are retried. A Retry-After hint from the store replaces the computed delay
//! for that attempt. No sleep ever runs past the batch budget: when the next wait would, the batch
//! is abandoned as timed out.

use std::time::Duration;

use tracing::{debug, warn};

use crate::deadline::Budget;
use crate::remote::{RemoteError, RemoteResult};

/// How often and how patiently a failing remote call is repeated. The wait doubles after every
/// transient failure until it reaches `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryConfig {
    pub const DEFAULT: Self = Self {
        max_retries: 8,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(300),
    };

    /// One attempt and no waiting.
    pub const NONE: Self = Self { max_retries: 0, initial_backoff: Duration::ZERO, max_backoff: Duration::ZERO };

    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self { max_retries, initial_backoff, max_backoff }
    }

    /// Wait before retry number `retry`, counting from 0.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        match self.initial_backoff.checked_mul(factor) {
            Some(wait) => wait.min(self.max_backoff),
            None => self.max_backoff,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug)]
pub enum RetryResult<T> {
    Success(T),
    /// A transient error persisted through every attempt.
    ExhaustedRetries { last_error: RemoteError, attempts: u32 },
    /// The batch budget ran out before the next attempt could start.
    TimedOut { last_error: Option<RemoteError>, attempts: u32 },
    /// A non-transient error. Returned on the attempt that produced it.
    PermanentError(RemoteError),
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::TimedOut { last_error, attempts } => Err(last_error.unwrap_or_else(|| {
                RemoteError::network(format!("batch budget exhausted after {attempts} attempts"))
            })),
            RetryResult::PermanentError(e) => Err(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, RetryResult::TimedOut { .. })
    }
}

/// Run `operation` until it succeeds, fails permanently, runs out of attempts, or runs out of
/// budget.
pub fn retry_with_backoff<T, F>(config: &RetryConfig, budget: &Budget, mut operation: F) -> RetryResult<T>
where
    F: FnMut() -> RemoteResult<T>,
{
    let max_attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0;
    let mut last_error = None;

    loop {
        if budget.is_exhausted() {
            return RetryResult::TimedOut { last_error, attempts: attempt };
        }
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    debug!("remote call succeeded after {} retries", attempt);
                }
                return RetryResult::Success(value);
            }
            Err(e) => {
                attempt += 1;
                if !e.is_transient() {
                    return RetryResult::PermanentError(e);
                }
                if attempt >= max_attempts {
                    warn!("giving up after {} attempts: {}", attempt, e);
                    return RetryResult::ExhaustedRetries { last_error: e, attempts: attempt };
                }

                let delay = e.retry_after.unwrap_or_else(|| config.backoff(attempt - 1));
                if delay > budget.remaining() {
                    warn!("backoff of {:?} exceeds the remaining batch budget: {}", delay, e);
                    return RetryResult::TimedOut { last_error: Some(e), attempts: attempt };
                }
                debug!("transient remote error (attempt {}/{}), retrying in {:?}: {}", attempt, max_attempts, delay, e);
                last_error = Some(e);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
