//! Cancellation signal shared by every part of a running pipeline.
//!
//! A signal starts active and transitions to cancelled exactly once. Any
//! number of observers may wait on it; cancelling never blocks. Clones share
//! the same state, so the host keeps one handle and the pipeline keeps others.

use parking_lot::Mutex;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// One-shot, broadcast stop notification with an optional deadline.
///
/// The deadline is shared like the cancellation state: a deadline armed
/// through any clone is visible through every other clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl CancellationSignal {
    /// Create a new, active signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that cancels itself once `timeout` elapses.
    ///
    /// Must be called from within a tokio runtime. The timer task exits as
    /// soon as the signal is cancelled by any other means.
    pub fn with_timeout(timeout: Duration) -> Self {
        let signal = Self::new();
        if let Some(deadline) = signal.tighten_deadline(timeout) {
            let timer = signal.clone();
            tokio::spawn(async move { timer.expire_at(deadline, future::pending()).await });
        }
        signal
    }

    /// Record a deadline `timeout` from now.
    ///
    /// The deadline only ever moves earlier. Returns the new instant when it
    /// did, `None` when an earlier deadline is already in effect.
    pub(crate) fn tighten_deadline(&self, timeout: Duration) -> Option<Instant> {
        let deadline = Instant::now() + timeout;
        let mut current = self.deadline.lock();
        if current.is_some_and(|existing| existing <= deadline) {
            return None;
        }
        *current = Some(deadline);
        Some(deadline)
    }

    /// Cancel at `deadline` unless the signal fires first or `lapse`
    /// completes.
    pub(crate) async fn expire_at(&self, deadline: Instant, lapse: impl Future<Output = ()>) {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {}
            _ = lapse => {
                tracing::trace!("Deadline lapsed before firing");
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!("Deadline elapsed, cancelling");
                self.token.cancel();
            }
        }
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Cancellation requested");
        }
        self.token.cancel();
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future that completes once the signal fires.
    ///
    /// Completes immediately if the signal is already cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The instant at which the signal cancels itself, if a deadline is armed.
    ///
    /// A deadline armed by a pipeline run lapses without firing once that
    /// run has finished; it is still reported here.
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }
}
