//! ExpirationManager - 期限切れエンティティの定期削除
//!
//! # フロー
//! 1. `locks:expirationmanager` の分散ロックを取得（同時に走るスイープは 1 つだけ）
//!    パスごとに新しい owner を採番するので、同じプロセス内の別パスとも排他になる
//! 2. 1 つの書き込みトランザクションで、`expire_at < now` の Job / List / Set / Hash と、
//!    削除した Job を指すキューエントリを削除
//! 3. ロックを解放
//! 4. `job_expiration_check_interval` だけ待つ（キャンセルされたら即座に戻る）

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::StorageOptions;
use crate::domain::{
    Expiring, HashField, JobId, JobRecord, ListItem, QueueEntry, SetItem, StorageError,
};
use crate::lock::DistributedLock;
use crate::ports::{Clock, IdGenerator, Record, Store, Transaction};

/// Lock resource serializing sweeps across processes.
pub const EXPIRATION_LOCK_RESOURCE: &str = "locks:expirationmanager";

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub jobs: usize,
    pub queue_entries: usize,
    pub list_items: usize,
    pub set_items: usize,
    pub hash_fields: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.jobs + self.queue_entries + self.list_items + self.set_items + self.hash_fields
    }
}

/// Periodic sweep of expired entities under the expiration lock.
pub struct ExpirationManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    lock: DistributedLock<S>,
    lock_timeout: Duration,
    check_interval: Duration,
}

impl<S> Clone for ExpirationManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            lock: self.lock.clone(),
            lock_timeout: self.lock_timeout,
            check_interval: self.check_interval,
        }
    }
}

impl<S: Store> ExpirationManager<S> {
    /// Every pass draws its own lock owner from `ids`, so clones of one
    /// manager still exclude each other.
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        lock: DistributedLock<S>,
        options: &StorageOptions,
    ) -> Result<Self, StorageError> {
        options.validate()?;
        Ok(Self {
            store,
            clock,
            ids,
            lock,
            lock_timeout: options.expiration_lock_timeout,
            check_interval: options.job_expiration_check_interval,
        })
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run one sweep, then wait out the check interval.
    ///
    /// Cancellation while waiting for the lock returns `Cancelled`; once the
    /// sweep has committed, cancellation only cuts the trailing wait short.
    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<SweepReport, StorageError> {
        let report = self.sweep(cancellation).await?;
        if report.total() > 0 {
            info!(
                jobs = report.jobs,
                queue_entries = report.queue_entries,
                list_items = report.list_items,
                set_items = report.set_items,
                hash_fields = report.hash_fields,
                "expired entities removed"
            );
        } else {
            debug!("nothing expired");
        }

        tokio::select! {
            _ = cancellation.cancelled() => debug!("expiration wait cancelled"),
            _ = tokio::time::sleep(self.check_interval) => {}
        }
        Ok(report)
    }

    /// The locked delete pass alone, without the trailing wait.
    pub async fn sweep(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<SweepReport, StorageError> {
        let owner = self.ids.generate_lock_owner_id();
        debug!(%owner, "starting expiration pass");
        let _guard = self
            .lock
            .acquire_cancellable(
                &owner,
                EXPIRATION_LOCK_RESOURCE,
                self.lock_timeout,
                cancellation,
            )
            .await?;

        self.store.write(|tx| {
            let now = self.clock.now();
            let jobs = remove_expired::<JobRecord>(tx, now);
            let job_ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
            let queue_entries = tx.remove_where::<QueueEntry>(|entry| job_ids.contains(&entry.job_id));

            Ok(SweepReport {
                jobs: jobs.len(),
                queue_entries: queue_entries.len(),
                list_items: remove_expired::<ListItem>(tx, now).len(),
                set_items: remove_expired::<SetItem>(tx, now).len(),
                hash_fields: remove_expired::<HashField>(tx, now).len(),
            })
        })
    }
}

fn remove_expired<R>(tx: &mut Transaction<'_>, now: chrono::DateTime<chrono::Utc>) -> Vec<R>
where
    R: Record + Expiring,
{
    tx.remove_where::<R>(|row| row.is_expired_at(now))
}

/// Background task calling [`ExpirationManager::execute`] until cancelled.
pub struct ExpirationRunner {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirationRunner {
    /// Failures are logged and the next pass starts after the check interval.
    pub fn spawn<S: Store>(manager: ExpirationManager<S>, cancellation: CancellationToken) -> Self {
        let token = cancellation.clone();
        let handle = tokio::spawn(async move {
            while !token.is_cancelled() {
                match manager.execute(&token).await {
                    Ok(_) => {}
                    Err(StorageError::Cancelled) => break,
                    Err(err) => {
                        error!(error = %err, retryable = err.is_retryable(), "expiration sweep failed");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(manager.check_interval()) => {}
                        }
                    }
                }
            }
            debug!("expiration runner stopped");
        });
        Self {
            cancellation,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait for the running pass to finish.
    pub async fn shutdown_and_join(self) {
        self.cancellation.cancel();
        if let Err(err) = self.handle.await {
            error!(error = %err, "expiration runner panicked");
        }
    }
}
