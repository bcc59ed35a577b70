//! Handle for a claimed queue entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::JobQueueSemaphore;
use crate::domain::{JobId, QueueEntry, QueueEntryId, StorageError};
use crate::ports::{Clock, FetchedJobHandle, Store};

/// A job claimed by this consumer.
///
/// State transitions:
/// - Claimed -> Removed (`remove_from_queue`)
/// - Claimed -> Requeued (`requeue`, or drop without finalizing)
///
/// Requeue and keep-alive only touch the row while it still carries this
/// handle's `fetched_at`; once the invisibility window has lapsed and another
/// consumer re-claimed the entry, that claim is left alone.
pub struct FetchedJob<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<JobQueueSemaphore>,
    entry_id: QueueEntryId,
    job_id: JobId,
    queue: String,
    fetched_at: DateTime<Utc>,
    finalized: bool,
}

impl<S: Store> FetchedJob<S> {
    pub(crate) fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        semaphore: Arc<JobQueueSemaphore>,
        entry: QueueEntry,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            clock,
            semaphore,
            entry_id: entry.id,
            job_id: entry.job_id,
            queue: entry.queue,
            fetched_at,
            finalized: false,
        }
    }

    pub fn entry_id(&self) -> QueueEntryId {
        self.entry_id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Delete the entry: the job left the queue for good.
    pub fn remove_from_queue(&mut self) -> Result<(), StorageError> {
        let entry_id = self.entry_id;
        self.store.write(|tx| {
            tx.remove::<QueueEntry>(&entry_id);
            Ok(())
        })?;
        self.finalized = true;
        debug!(%entry_id, job_id = %self.job_id, "job removed from queue");
        Ok(())
    }

    /// Clear the claim so any consumer can fetch the job again right away.
    pub fn requeue(&mut self) -> Result<(), StorageError> {
        let entry_id = self.entry_id;
        let fetched_at = self.fetched_at;
        let requeued = self.store.write(|tx| {
            let still_ours = tx
                .get::<QueueEntry>(&entry_id)
                .is_some_and(|entry| entry.fetched_at == Some(fetched_at));
            if still_ours {
                tx.update::<QueueEntry>(&entry_id, QueueEntry::requeue);
            }
            Ok(still_ours)
        })?;
        self.finalized = true;

        if requeued {
            self.semaphore.release(&self.queue);
            debug!(%entry_id, job_id = %self.job_id, "job requeued");
        } else {
            debug!(%entry_id, job_id = %self.job_id, "claim already gone, nothing to requeue");
        }
        Ok(())
    }

    /// Restart the invisibility window for a long-running job.
    ///
    /// Returns `false` when the claim is no longer ours (entry removed, or
    /// re-claimed by another consumer after the window lapsed).
    pub fn extend_invisibility(&mut self) -> Result<bool, StorageError> {
        if self.finalized {
            return Ok(false);
        }
        let entry_id = self.entry_id;
        let fetched_at = self.fetched_at;
        let now = self.clock.now();
        let extended = self.store.write(|tx| {
            let still_ours = tx
                .get::<QueueEntry>(&entry_id)
                .is_some_and(|entry| entry.fetched_at == Some(fetched_at));
            if still_ours {
                tx.update::<QueueEntry>(&entry_id, |entry| entry.mark_fetched(now));
            }
            Ok(still_ours)
        })?;

        if extended {
            self.fetched_at = now;
        } else {
            warn!(%entry_id, job_id = %self.job_id, "lost claim on queue entry");
        }
        Ok(extended)
    }
}

impl<S: Store> FetchedJobHandle for FetchedJob<S> {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn remove_from_queue(&mut self) -> Result<(), StorageError> {
        FetchedJob::remove_from_queue(self)
    }

    fn requeue(&mut self) -> Result<(), StorageError> {
        FetchedJob::requeue(self)
    }
}

impl<S: Store> Drop for FetchedJob<S> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Err(err) = self.requeue() {
            warn!(
                entry_id = %self.entry_id,
                job_id = %self.job_id,
                error = %err,
                "failed to requeue abandoned job; it becomes visible after the invisibility timeout"
            );
        }
    }
}

impl<S: Store> std::fmt::Debug for FetchedJob<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedJob")
            .field("entry_id", &self.entry_id)
            .field("job_id", &self.job_id)
            .field("queue", &self.queue)
            .field("fetched_at", &self.fetched_at)
            .field("finalized", &self.finalized)
            .finish()
    }
}
