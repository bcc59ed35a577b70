//! In-process wake-up signal for fetch loops.
//!
//! A producer that commits an entry releases the queue's signal so that a
//! fetch loop in the same process polls again right away instead of sleeping
//! out the poll interval. Losing a signal only costs latency: the fetch loop
//! always re-reads the store.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::domain::StorageError;

/// Per-queue pending signal plus one shared `Notify` for every waiter.
///
/// Releasing a queue that is already signaled is a no-op, so a burst of
/// enqueues wakes waiters once. No ordering between waiters is promised.
#[derive(Debug, Default)]
pub struct JobQueueSemaphore {
    signaled: Mutex<HashSet<String>>,
    notify: Notify,
}

impl JobQueueSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    fn signaled(&self) -> MutexGuard<'_, HashSet<String>> {
        self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal that `queue` may have work.
    pub fn release(&self, queue: &str) {
        let newly_signaled = self.signaled().insert(queue.to_owned());
        if newly_signaled {
            trace!(queue, "queue signaled");
            self.notify.notify_waiters();
        }
    }

    /// Consume the pending signal for `queue`, if any, without waiting.
    pub fn wait_non_block(&self, queue: &str) -> bool {
        self.signaled().remove(queue)
    }

    fn take_any(&self, queues: &[&str]) -> Option<String> {
        let mut signaled = self.signaled();
        queues
            .iter()
            .find(|queue| signaled.contains(**queue))
            .map(|queue| {
                signaled.remove(*queue);
                (*queue).to_owned()
            })
    }

    /// Wait until one of `queues` is signaled (returns its name), `timeout`
    /// elapses (`Ok(None)`), or `cancellation` fires.
    ///
    /// Any release wakes the waiter once. If another waiter consumed the
    /// signal first, this returns `Ok(None)` early and the caller re-polls.
    pub async fn wait_any(
        &self,
        queues: &[&str],
        cancellation: &CancellationToken,
        timeout: Duration,
    ) -> Result<Option<String>, StorageError> {
        // Register interest before checking, so a release racing the check
        // below still wakes us.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if cancellation.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if let Some(queue) = self.take_any(queues) {
            return Ok(Some(queue));
        }

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(StorageError::Cancelled),
            _ = &mut notified => Ok(self.take_any(queues)),
            _ = sleep(timeout) => Ok(None),
        }
    }
}

async fn sleep(timeout: Duration) {
    match Instant::now().checked_add(timeout) {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
