//! spool-core
//!
//! Job storage adapter core: store-backed job queue, distributed lock and
//! expiration sweep for a background-job framework.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, queue_entry, lock, expiring, errors）
//! - **ports**: 抽象化レイヤー（Store, Clock, IdGenerator, PersistentJobQueue）
//! - **impls**: 実装（InMemoryStore など開発用）
//! - **queue**: フェッチエンジン（JobQueue, FetchedJob, JobQueueSemaphore）
//! - **lock**: 分散ロック（DistributedLock, LockGuard, LockRegistry）
//! - **app**: 窓口と定期処理（Storage, StorageBuilder, ExpirationManager）
//! - **config**: オプション（StorageOptions）
//! - **observability**: 読み取り専用の集計（QueueCounts）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod lock;
pub mod observability;
pub mod ports;
pub mod queue;

#[cfg(test)]
mod testing;

pub use app::{Storage, StorageBuilder, SweepReport};
pub use config::StorageOptions;
pub use domain::{ErrorKind, JobId, LockOwnerId, QueueEntryId, StorageError, StoreError};
pub use lock::{DistributedLock, LockGuard, LockRegistry};
pub use queue::{FetchedJob, JobQueue, JobQueueSemaphore};
