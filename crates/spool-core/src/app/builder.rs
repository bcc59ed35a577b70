//! StorageBuilder - ストレージの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast 設計）
//! - build() で `StorageOptions::validate()` を実行
//! - 範囲外のオプションは `StorageError::InvalidOptions` として即座に返す
//! - Clock / IdGenerator / セマフォ / ロックレジストリは差し替え可能（テスト用）

use std::sync::Arc;

use super::expiration::ExpirationManager;
use super::storage::Storage;
use crate::config::StorageOptions;
use crate::domain::StorageError;
use crate::lock::{DistributedLock, LockRegistry};
use crate::ports::{Clock, IdGenerator, Store, SystemClock, UlidGenerator};
use crate::queue::{JobQueue, JobQueueSemaphore};

/// StorageBuilder は `Storage` を構築
///
/// # 使用例
/// ```ignore
/// let storage = StorageBuilder::new(Arc::new(InMemoryStore::new()))
///     .options(StorageOptions::from_env())
///     .build()?;
/// ```
///
/// 同じプロセス内の `Storage` 同士で通知とロックの再入を共有したい場合は、
/// `semaphore()` / `lock_registry()` に同じインスタンスを渡します。
pub struct StorageBuilder<S> {
    store: Arc<S>,
    options: StorageOptions,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    semaphore: Option<Arc<JobQueueSemaphore>>,
    registry: Option<Arc<LockRegistry>>,
}

impl<S: Store> StorageBuilder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            options: StorageOptions::default(),
            clock: None,
            ids: None,
            semaphore: None,
            registry: None,
        }
    }

    pub fn options(mut self, options: StorageOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn semaphore(mut self, semaphore: Arc<JobQueueSemaphore>) -> Self {
        self.semaphore = Some(semaphore);
        self
    }

    pub fn lock_registry(mut self, registry: Arc<LockRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate the options and wire every component.
    pub fn build(self) -> Result<Storage<S>, StorageError> {
        self.options.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let semaphore = self.semaphore.unwrap_or_default();
        let registry = self.registry.unwrap_or_default();

        let lock = DistributedLock::new(
            Arc::clone(&self.store),
            Arc::clone(&clock),
            registry,
            self.options.distributed_lock_lifetime,
        )?;
        let queue = JobQueue::new(
            Arc::clone(&self.store),
            Arc::clone(&clock),
            Arc::clone(&ids),
            semaphore,
            &self.options,
        )?;
        let expiration = ExpirationManager::new(
            Arc::clone(&self.store),
            clock,
            Arc::clone(&ids),
            lock.clone(),
            &self.options,
        )?;

        Ok(Storage::from_parts(
            self.store,
            self.options,
            ids,
            lock,
            queue,
            expiration,
        ))
    }
}
