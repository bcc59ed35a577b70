//! Fetch engine: claims the oldest visible entry from the first queue that has one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::{FetchedJob, JobQueueSemaphore};
use crate::config::{StorageOptions, to_chrono};
use crate::domain::{JobId, QueueEntry, QueueEntryId, StorageError};
use crate::observability::QueueCounts;
use crate::ports::{Clock, IdGenerator, PersistentJobQueue, Store};

/// Store-backed job queue.
///
/// Cross-process safety comes from the store: the eligibility check and the
/// `fetched_at` write happen in one write transaction, so two consumers can
/// never claim the same entry inside its invisibility window.
pub struct JobQueue<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    semaphore: Arc<JobQueueSemaphore>,
    poll_interval: Duration,
    invisibility_timeout: chrono::Duration,
}

impl<S> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            semaphore: Arc::clone(&self.semaphore),
            poll_interval: self.poll_interval,
            invisibility_timeout: self.invisibility_timeout,
        }
    }
}

impl<S: Store> JobQueue<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        semaphore: Arc<JobQueueSemaphore>,
        options: &StorageOptions,
    ) -> Result<Self, StorageError> {
        options.validate()?;
        Ok(Self {
            store,
            clock,
            ids,
            semaphore,
            poll_interval: options.queue_poll_interval,
            invisibility_timeout: to_chrono(
                "sliding_invisibility_timeout",
                options.sliding_invisibility_timeout,
            )?,
        })
    }

    pub fn semaphore(&self) -> &Arc<JobQueueSemaphore> {
        &self.semaphore
    }

    /// Commit a new visible entry for `job_id` and wake local fetch loops.
    #[instrument(skip(self), err)]
    pub fn enqueue(&self, queue: &str, job_id: JobId) -> Result<QueueEntryId, StorageError> {
        validate_queue_name(queue)?;
        let entry = QueueEntry::new(
            self.ids.generate_queue_entry_id(),
            job_id,
            queue,
            self.clock.now(),
        );
        let entry_id = entry.id;
        self.store.write(|tx| {
            tx.insert(entry);
            Ok(())
        })?;

        self.semaphore.release(queue);
        debug!(%entry_id, "job enqueued");
        Ok(entry_id)
    }

    /// Block until a job is claimed from one of `queues` or `cancellation` fires.
    ///
    /// Every pass tries the queues in the given order, so earlier names act as
    /// priorities. When nothing is eligible the loop waits on the semaphore for
    /// at most the poll interval and then polls the store again.
    #[instrument(skip(self, cancellation))]
    pub async fn dequeue(
        &self,
        queues: &[&str],
        cancellation: &CancellationToken,
    ) -> Result<FetchedJob<S>, StorageError> {
        validate_queues(queues)?;

        loop {
            for queue in queues {
                if cancellation.is_cancelled() {
                    return Err(StorageError::Cancelled);
                }
                if let Some(job) = self.try_claim(queue)? {
                    self.semaphore.wait_non_block(queue);
                    return Ok(job);
                }
            }

            if cancellation.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let woke = self
                .semaphore
                .wait_any(queues, cancellation, self.poll_interval)
                .await?;
            trace!(?woke, "polling queues again");
        }
    }

    fn try_claim(&self, queue: &str) -> Result<Option<FetchedJob<S>>, StorageError> {
        let invisibility_timeout = self.invisibility_timeout;
        let claimed = self.store.write(|tx| {
            let now = self.clock.now();
            let oldest = tx
                .scan::<QueueEntry>()
                .filter(|entry| entry.queue == queue)
                .filter(|entry| entry.is_eligible_at(now, invisibility_timeout))
                .min_by_key(|entry| (entry.created, entry.id))
                .map(|entry| entry.id);

            let Some(entry_id) = oldest else {
                return Ok(None);
            };
            Ok(tx.update::<QueueEntry>(&entry_id, |entry| entry.mark_fetched(now)))
        })?;

        Ok(claimed.map(|entry| {
            debug!(entry_id = %entry.id, job_id = %entry.job_id, queue, "job fetched");
            self.fetched(entry)
        }))
    }

    fn fetched(&self, entry: QueueEntry) -> FetchedJob<S> {
        // `try_claim` only returns entries it has just stamped.
        let fetched_at = entry.fetched_at.unwrap_or_else(|| self.clock.now());
        FetchedJob::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.semaphore),
            entry,
            fetched_at,
        )
    }

    /// Visible vs. claimed entries of `queue` right now.
    pub fn counts(&self, queue: &str) -> Result<QueueCounts, StorageError> {
        let now = self.clock.now();
        let timeout = self.invisibility_timeout;
        self.store.read(|tables| {
            tables
                .scan::<QueueEntry>()
                .filter(|entry| entry.queue == queue)
                .fold(QueueCounts::default(), |mut counts, entry| {
                    if entry.is_eligible_at(now, timeout) {
                        counts.enqueued += 1;
                    } else {
                        counts.fetched += 1;
                    }
                    counts
                })
        })
    }

    /// Distinct queue names that currently hold at least one entry.
    pub fn queues(&self) -> Result<Vec<String>, StorageError> {
        self.store.read(|tables| {
            let mut names: Vec<String> = tables
                .scan::<QueueEntry>()
                .map(|entry| entry.queue.clone())
                .collect();
            names.sort();
            names.dedup();
            names
        })
    }
}

#[async_trait]
impl<S: Store> PersistentJobQueue for JobQueue<S> {
    type Fetched = FetchedJob<S>;

    fn enqueue(&self, queue: &str, job_id: JobId) -> Result<QueueEntryId, StorageError> {
        JobQueue::enqueue(self, queue, job_id)
    }

    async fn dequeue(
        &self,
        queues: &[&str],
        cancellation: &CancellationToken,
    ) -> Result<Self::Fetched, StorageError> {
        JobQueue::dequeue(self, queues, cancellation).await
    }
}

fn validate_queue_name(queue: &str) -> Result<(), StorageError> {
    if queue.trim().is_empty() {
        return Err(StorageError::invalid_argument(
            "queue",
            "queue name must not be empty",
        ));
    }
    Ok(())
}

fn validate_queues(queues: &[&str]) -> Result<(), StorageError> {
    if queues.is_empty() {
        return Err(StorageError::invalid_argument(
            "queues",
            "at least one queue is required",
        ));
    }
    queues.iter().try_for_each(|queue| validate_queue_name(queue))
}
