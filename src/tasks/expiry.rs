//! Expiry Scheduler
//!
//! One cancellable deferred action per entry with a TTL.
//!
//! Each action is a spawned tokio task that sleeps for the TTL and then runs
//! the callback it was armed with. The returned [`ScheduledExpiry`] owns the
//! task: cancelling or dropping it aborts the task if it has not fired yet.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

// == Scheduled Expiry ==
/// Cancellation handle for a pending expiry action.
///
/// Owned by exactly one entry; never cloned.
#[derive(Debug)]
pub struct ScheduledExpiry {
    handle: Option<AbortHandle>,
}

impl ScheduledExpiry {
    /// Aborts the action if it has not fired yet.
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Releases ownership without aborting.
    ///
    /// Used by the action itself once it fires, so that detaching it from its
    /// entry does not abort the task that is currently running.
    pub(crate) fn disarm(mut self) {
        self.handle.take();
    }

    /// True once the underlying task has fired or been aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, AbortHandle::is_finished)
    }
}

impl Drop for ScheduledExpiry {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Arms an action that runs `on_fire` once, `delay` from now.
///
/// Must be called from within a tokio runtime.
///
/// # Example
/// ```ignore
/// let expiry = schedule_expiry(Duration::from_millis(100), move || {
///     async move { println!("expired") }.boxed()
/// });
/// // Replacing the entry:
/// expiry.cancel();
/// ```
pub fn schedule_expiry<F>(delay: Duration, on_fire: F) -> ScheduledExpiry
where
    F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
{
    // Deadline is fixed at arming, not at the task's first poll.
    let deadline = Instant::now() + delay;
    let task = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        debug!(delay_ms = delay.as_millis() as u64, "Expiry action fired");
        on_fire().await;
    });

    ScheduledExpiry {
        handle: Some(task.abort_handle()),
    }
}
