//! PersistentJobQueue port - ジョブフレームワークから見たキュー
//!
//! # 設計原則
//! - enqueue は 1 トランザクションで行を追加し、同一プロセスの fetch ループを起こす
//! - dequeue は「全キューを 1 回ずつ試す → だめなら待つ」を繰り返す
//! - 取り出した行は `FetchedJobHandle` が所有し、必ず remove / requeue される
//!   （どちらも呼ばれずに drop されたら requeue 扱い）

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{JobId, QueueEntryId, StorageError};

/// A claimed queue entry.
///
/// The worker owns this handle and must either `remove_from_queue` or
/// `requeue` it; dropping it without either puts the job back.
pub trait FetchedJobHandle: Send {
    fn job_id(&self) -> JobId;

    fn queue(&self) -> &str;

    /// Job fully processed (success, or failure handed to the state machine).
    fn remove_from_queue(&mut self) -> Result<(), StorageError>;

    /// Make the job visible to every consumer again.
    fn requeue(&mut self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait PersistentJobQueue: Send + Sync {
    type Fetched: FetchedJobHandle;

    fn enqueue(&self, queue: &str, job_id: JobId) -> Result<QueueEntryId, StorageError>;

    /// Wait for the next job from `queues` (earlier names win) or cancellation.
    async fn dequeue(
        &self,
        queues: &[&str],
        cancellation: &CancellationToken,
    ) -> Result<Self::Fetched, StorageError>;
}
