//! Run and batch ceilings plus cooperative cancellation.
//!
//! A run owns one [`Deadline`]. Every remote call (a batch, a page fetch) gets a [`Budget`] that
//! ends at the batch ceiling or the run ceiling, whichever comes first. Cancellation is only
//! observed between batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Shared flag an embedder flips to stop a run at the next batch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run stopped before working through every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Interruption {
    RunTimeout,
    Cancelled,
    /// The playlist listing could not be fetched, so nothing could be planned.
    ListingFailed { message: String },
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interruption::RunTimeout => write!(f, "run timeout"),
            Interruption::Cancelled => write!(f, "cancelled"),
            Interruption::ListingFailed { message } => write!(f, "listing failed: {message}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    // None when the timeout lies beyond what `Instant` can represent.
    expires_at: Option<Instant>,
    cancel: CancelFlag,
}

impl Deadline {
    pub fn new(run_timeout: Duration, cancel: CancelFlag) -> Self {
        let started = Instant::now();
        Self { started, expires_at: started.checked_add(run_timeout), cancel }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        remaining_until(self.expires_at)
    }

    pub fn is_expired(&self) -> bool {
        expired(self.expires_at)
    }

    /// Checked between batches. Cancellation wins over the timeout when both apply.
    pub fn interruption(&self) -> Option<Interruption> {
        if self.cancel.is_cancelled() {
            Some(Interruption::Cancelled)
        } else if self.is_expired() {
            Some(Interruption::RunTimeout)
        } else {
            None
        }
    }

    pub fn batch_budget(&self, batch_timeout: Duration) -> Budget {
        let batch_end = Instant::now().checked_add(batch_timeout);
        let expires_at = match (batch_end, self.expires_at) {
            (Some(batch), Some(run)) => Some(batch.min(run)),
            (batch, run) => batch.or(run),
        };
        Budget { expires_at }
    }
}

/// Time allotted to a single batch, including its retries.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    expires_at: Option<Instant>,
}

impl Budget {
    pub fn new(timeout: Duration) -> Self {
        Self { expires_at: Instant::now().checked_add(timeout) }
    }

    pub fn remaining(&self) -> Duration {
        remaining_until(self.expires_at)
    }

    pub fn is_exhausted(&self) -> bool {
        expired(self.expires_at)
    }
}

fn remaining_until(expires_at: Option<Instant>) -> Duration {
    expires_at.map_or(Duration::MAX, |at| at.saturating_duration_since(Instant::now()))
}

fn expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| Instant::now() >= at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let deadline = Deadline::new(Duration::from_secs(60), flag.clone());
        assert_eq!(deadline.interruption(), None);
        flag.cancel();
        assert_eq!(deadline.interruption(), Some(Interruption::Cancelled));
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let deadline = Deadline::new(Duration::ZERO, CancelFlag::new());
        assert!(deadline.is_expired());
        assert_eq!(deadline.interruption(), Some(Interruption::RunTimeout));
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn batch_budget_is_capped_by_run() {
        let deadline = Deadline::new(Duration::from_secs(1), CancelFlag::new());
        let budget = deadline.batch_budget(Duration::from_secs(60));
        assert!(budget.remaining() <= Duration::from_secs(1));

        let budget = deadline.batch_budget(Duration::ZERO);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn unrepresentable_timeout_never_expires() {
        let deadline = Deadline::new(Duration::MAX, CancelFlag::new());
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::MAX);

        let budget = deadline.batch_budget(Duration::MAX);
        assert!(!budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::MAX);

        let budget = deadline.batch_budget(Duration::from_secs(5));
        assert!(budget.remaining() <= Duration::from_secs(5));
        assert!(!Budget::new(Duration::MAX).is_exhausted());
    }
}
