//! Storage - ジョブフレームワークから見た窓口
//!
//! ロック・キュー・期限切れスイープをひとまとめにして公開します。
//! 構築は [`StorageBuilder`](super::StorageBuilder) から。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::expiration::{ExpirationManager, ExpirationRunner, SweepReport};
use crate::config::StorageOptions;
use crate::domain::{JobId, LockOwnerId, QueueEntryId, StorageError};
use crate::lock::{DistributedLock, LockGuard};
use crate::observability::QueueCounts;
use crate::ports::{IdGenerator, Store};
use crate::queue::{FetchedJob, JobQueue};

pub struct Storage<S> {
    store: Arc<S>,
    options: StorageOptions,
    ids: Arc<dyn IdGenerator>,
    lock: DistributedLock<S>,
    queue: JobQueue<S>,
    expiration: ExpirationManager<S>,
}

impl<S: Store> Storage<S> {
    pub(crate) fn from_parts(
        store: Arc<S>,
        options: StorageOptions,
        ids: Arc<dyn IdGenerator>,
        lock: DistributedLock<S>,
        queue: JobQueue<S>,
        expiration: ExpirationManager<S>,
    ) -> Self {
        Self {
            store,
            options,
            ids,
            lock,
            queue,
            expiration,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn queue(&self) -> &JobQueue<S> {
        &self.queue
    }

    pub fn lock(&self) -> &DistributedLock<S> {
        &self.lock
    }

    /// Fresh identity for a logical lock holder.
    pub fn new_lock_owner(&self) -> LockOwnerId {
        self.ids.generate_lock_owner_id()
    }

    pub async fn acquire_lock(
        &self,
        owner: &LockOwnerId,
        resource: &str,
        timeout: Duration,
    ) -> Result<LockGuard<S>, StorageError> {
        self.lock.acquire(owner, resource, timeout).await
    }

    pub fn enqueue(&self, queue: &str, job_id: JobId) -> Result<QueueEntryId, StorageError> {
        self.queue.enqueue(queue, job_id)
    }

    /// Block until a job is fetched from `queues` (earlier names first).
    pub async fn fetch_next(
        &self,
        queues: &[&str],
        cancellation: &CancellationToken,
    ) -> Result<FetchedJob<S>, StorageError> {
        self.queue.dequeue(queues, cancellation).await
    }

    pub fn queue_counts(&self, queue: &str) -> Result<QueueCounts, StorageError> {
        self.queue.counts(queue)
    }

    /// One sweep plus the check-interval wait.
    pub async fn run_expiration_sweep(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<SweepReport, StorageError> {
        self.expiration.execute(cancellation).await
    }

    /// Keep sweeping in the background until `cancellation` fires.
    pub fn spawn_expiration(&self, cancellation: CancellationToken) -> ExpirationRunner {
        ExpirationRunner::spawn(self.expiration.clone(), cancellation)
    }
}
