//! Single-slot delayed task.
//!
//! ```text
//! schedule(a) ──┐
//!               │ 300ms           schedule(b) aborts a's timer
//! schedule(b) ──┼──────┐
//!               ✗      │ delay
//!                      ▼
//!                 spawn(b)  ── runs detached, never interrupted
//! ```
//!
//! Only the waiting phase is cancellable. Once the delay elapses the action
//! is spawned as its own task, so a later `schedule` or `cancel` cannot tear
//! down a write that is already on the wire.
//!
//! `schedule` spawns on the ambient Tokio runtime and must be called from
//! inside one.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle to one scheduled action.
#[derive(Debug, Clone)]
pub struct CancelToken {
    timer: Arc<AbortHandle>,
    /// Set once the delay elapsed and the action was handed off.
    fired: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Discard the action if it has not fired yet. Returns `true` if this
    /// call prevented it from running.
    pub fn cancel(&self) -> bool {
        let was_pending = self.is_pending();
        self.cancelled.store(true, Ordering::SeqCst);
        self.timer.abort();
        was_pending
    }

    /// Still waiting for its delay to elapse.
    pub fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst)
            && !self.cancelled.load(Ordering::SeqCst)
            && !self.timer.is_finished()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// At most one pending action; scheduling replaces the previous one.
#[derive(Debug, Default)]
pub struct Debouncer {
    slot: Option<CancelToken>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, cancelling whatever was pending.
    pub fn schedule<F>(&mut self, delay: Duration, action: F) -> CancelToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_task = fired.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fired_in_task.store(true, Ordering::SeqCst);
            tokio::spawn(action);
        });

        let token = CancelToken {
            timer: Arc::new(timer.abort_handle()),
            fired,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.slot = Some(token.clone());
        token
    }

    /// Discard the pending action. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.slot.take().map(|t| t.cancel()).unwrap_or(false)
    }

    pub fn is_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(CancelToken::is_pending)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
