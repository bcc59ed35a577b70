//! Distributed lock - ストアの行で表現するプロセス間相互排他
//!
//! # フロー
//! 1. 同じ owner が保持中なら（レジストリ）カウントを増やして即座に返す
//! 2. 1 つの書き込みトランザクション内で行を find-or-create し、空いていれば
//!    `expire_at = now + lifetime` / `holder = owner` を書き込む
//! 3. 取れなければ `timeout / 1000 + 5ms` 待って再試行、期限切れで `LockTimeout`
//! 4. 取得後は heartbeat が `lifetime / 5` ごとに期限を延長する
//! 5. `LockGuard` の drop で解放（最後の保持者のときだけストアを更新）

mod heartbeat;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::to_chrono;
use crate::domain::{LockOwnerId, LockRecord, StorageError};
use crate::ports::{Clock, Store};
use heartbeat::Heartbeat;
use registry::Lease;

pub use registry::LockRegistry;

const RETRY_FLOOR: Duration = Duration::from_millis(5);

/// Lease-based mutual exclusion over named resources.
pub struct DistributedLock<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    registry: Arc<LockRegistry>,
    lifetime: Duration,
    chrono_lifetime: chrono::Duration,
}

impl<S> Clone for DistributedLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            registry: Arc::clone(&self.registry),
            lifetime: self.lifetime,
            chrono_lifetime: self.chrono_lifetime,
        }
    }
}

impl<S: Store> DistributedLock<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        registry: Arc<LockRegistry>,
        lifetime: Duration,
    ) -> Result<Self, StorageError> {
        if lifetime.is_zero() {
            return Err(StorageError::InvalidOptions(
                "distributed_lock_lifetime must be positive".into(),
            ));
        }
        Ok(Self {
            store,
            clock,
            registry,
            lifetime,
            chrono_lifetime: to_chrono("distributed_lock_lifetime", lifetime)?,
        })
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Acquire `resource` for `owner`, waiting at most `timeout`.
    pub async fn acquire(
        &self,
        owner: &LockOwnerId,
        resource: &str,
        timeout: Duration,
    ) -> Result<LockGuard<S>, StorageError> {
        self.acquire_cancellable(owner, resource, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`acquire`](Self::acquire), giving up with `Cancelled` when
    /// `cancellation` fires.
    #[instrument(skip(self, owner, cancellation), fields(owner = %owner))]
    pub async fn acquire_cancellable(
        &self,
        owner: &LockOwnerId,
        resource: &str,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<LockGuard<S>, StorageError> {
        if resource.trim().is_empty() {
            return Err(StorageError::invalid_argument(
                "resource",
                "resource name must not be empty",
            ));
        }
        let owner = *owner;
        let deadline = Instant::now().checked_add(timeout);
        let pause = timeout / 1000 + RETRY_FLOOR;

        loop {
            if cancellation.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            if self.registry.reenter(resource, owner) {
                trace!("reentrant acquisition");
                return Ok(self.guard(resource, owner));
            }
            if self.try_acquire(resource, owner)? {
                self.start_lease(resource, owner);
                debug!("lock acquired");
                return Ok(self.guard(resource, owner));
            }

            let now = Instant::now();
            let sleep = match deadline {
                Some(deadline) if now >= deadline => {
                    debug!("timed out waiting for lock");
                    return Err(StorageError::LockTimeout {
                        resource: resource.to_owned(),
                    });
                }
                Some(deadline) => pause.min(deadline - now),
                None => pause,
            };
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// One attempt: check and take the lease inside one write transaction.
    fn try_acquire(&self, resource: &str, owner: LockOwnerId) -> Result<bool, StorageError> {
        let lifetime = self.chrono_lifetime;
        let key = resource.to_owned();
        self.store
            .write(|tx| {
                let now = self.clock.now();
                let record = tx.find_or_create::<LockRecord>(&key, || LockRecord::new(resource));
                if record.is_held_at(now) {
                    return Ok(false);
                }
                tx.update::<LockRecord>(&key, |record| record.grant(owner, now, lifetime));
                Ok(true)
            })
            .map_err(|source| StorageError::LockAcquisitionFailed {
                resource: resource.to_owned(),
                source: Box::new(source),
            })
    }

    fn start_lease(&self, resource: &str, owner: LockOwnerId) {
        let lease = Arc::new(Lease::default());
        let heartbeat = Heartbeat {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            lease: Arc::clone(&lease),
            resource: resource.to_owned(),
            owner,
            lifetime: self.chrono_lifetime,
        }
        .spawn(self.lifetime / 5);
        self.registry.register(resource, owner, lease, heartbeat);
    }

    fn guard(&self, resource: &str, owner: LockOwnerId) -> LockGuard<S> {
        LockGuard {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            resource: resource.to_owned(),
            owner,
        }
    }
}

/// A held lock. Dropping the guard releases one hold.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<S: Store> {
    store: Arc<S>,
    registry: Arc<LockRegistry>,
    resource: String,
    owner: LockOwnerId,
}

impl<S: Store> LockGuard<S> {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn owner(&self) -> LockOwnerId {
        self.owner
    }

    /// Release explicitly (same as dropping the guard).
    pub fn release(self) {
        drop(self);
    }

    fn release_last_hold(&self) {
        let Some(held) = self.registry.leave(&self.resource, self.owner) else {
            return;
        };
        let mut released = held.lease.lock();
        *released = true;
        held.heartbeat.abort();

        let owner = self.owner;
        let cleared = self.store.write(|tx| {
            let ours = tx
                .get::<LockRecord>(&self.resource)
                .is_some_and(|record| record.holder == Some(owner));
            if ours {
                tx.update::<LockRecord>(&self.resource, LockRecord::release);
            }
            Ok(ours)
        });
        match cleared {
            Ok(true) => debug!(resource = %self.resource, "lock released"),
            Ok(false) => warn!(resource = %self.resource, "lock was taken over before release"),
            Err(err) => warn!(
                resource = %self.resource,
                error = %err,
                "failed to release lock; it frees itself when the lease expires"
            ),
        }
    }
}

impl<S: Store> Drop for LockGuard<S> {
    fn drop(&mut self) {
        self.release_last_hold();
    }
}

impl<S: Store> std::fmt::Debug for LockGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StoreError;
    use crate::impls::InMemoryStore;
    use crate::ports::{Tables, Transaction};
    use crate::testing::Fixture;
    use chrono::{DateTime, Utc};

    const LIFETIME: Duration = Duration::from_secs(30);
    const RESOURCE: &str = "locks:test";

    fn record(fx: &Fixture) -> Option<LockRecord> {
        fx.store
            .read(|tables| tables.get::<LockRecord>(&RESOURCE.to_string()).cloned())
            .unwrap()
    }

    fn expire_at(fx: &Fixture) -> Option<DateTime<Utc>> {
        record(fx).and_then(|record| record.expire_at)
    }

    #[tokio::test(start_paused = true)]
    async fn free_lock_is_acquired_without_waiting() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let owner = LockOwnerId::generate();
        let start = Instant::now();

        let guard = lock.acquire(&owner, RESOURCE, Duration::ZERO).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(guard.resource(), RESOURCE);
        let row = record(&fx).unwrap();
        assert_eq!(row.holder, Some(owner));
        assert_eq!(row.expire_at, Some(fx.clock.now() + chrono::Duration::seconds(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_with_zero_timeout_fails_fast() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let _held = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();

        let err = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::LockTimeout { ref resource } if resource == RESOURCE));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn second_owner_waits_for_release() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let holder = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();

        let release_at = Instant::now() + Duration::from_millis(100);
        tokio::spawn(async move {
            tokio::time::sleep_until(release_at).await;
            drop(holder);
        });

        let waiter = LockOwnerId::generate();
        let guard = lock
            .acquire(&waiter, RESOURCE, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(Instant::now() >= release_at);
        assert_eq!(record(&fx).unwrap().holder, Some(waiter));
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_processes_exclude_each_other() {
        let fx = Fixture::new();
        let here = fx.lock(LIFETIME);
        let there = fx.lock(LIFETIME);
        let _held = here
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();

        let result = there
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(StorageError::LockTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn reentrant_acquire_skips_the_store() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let owner = LockOwnerId::generate();

        let outer = lock.acquire(&owner, RESOURCE, Duration::ZERO).await.unwrap();
        // The row is held, so only the registry can satisfy a zero-timeout acquire.
        let inner = lock.acquire(&owner, RESOURCE, Duration::ZERO).await.unwrap();
        assert_eq!(lock.registry().hold_count(RESOURCE, owner), 2);

        drop(inner);
        assert_eq!(record(&fx).unwrap().holder, Some(owner));
        drop(outer);
        assert_eq!(record(&fx).unwrap().holder, None);
    }

    #[tokio::test(start_paused = true)]
    async fn release_clears_the_lease() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let guard = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();

        guard.release();

        assert_eq!(expire_at(&fx), None);
        assert!(lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_extending_the_lease() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let _guard = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();

        let mut previous = expire_at(&fx).unwrap();
        for _ in 0..3 {
            fx.clock.advance(chrono::Duration::seconds(6));
            tokio::time::sleep(LIFETIME / 5 + Duration::from_millis(1)).await;
            tokio::task::yield_now().await;

            let current = expire_at(&fx).unwrap();
            assert!(current > previous, "{current} must be after {previous}");
            assert_eq!(current, fx.clock.now() + chrono::Duration::seconds(30));
            previous = current;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stops_after_release() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let guard = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();
        drop(guard);

        fx.clock.advance(chrono::Duration::seconds(6));
        tokio::time::sleep(LIFETIME).await;

        assert_eq!(expire_at(&fx), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lease_counts_as_free() {
        let fx = Fixture::new();
        let stale_owner = LockOwnerId::generate();
        fx.store
            .write(|tx| {
                let mut row = LockRecord::new(RESOURCE);
                row.grant(stale_owner, fx.clock.now(), chrono::Duration::seconds(-1));
                tx.insert(row);
                Ok(())
            })
            .unwrap();

        let owner = LockOwnerId::generate();
        let _guard = fx
            .lock(LIFETIME)
            .acquire(&owner, RESOURCE, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(record(&fx).unwrap().holder, Some(owner));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lease_is_not_renewed_or_cleared() {
        let fx = Fixture::new();
        let first = LockOwnerId::generate();
        let second = LockOwnerId::generate();
        let stalled = fx.lock(LIFETIME).acquire(&first, RESOURCE, Duration::ZERO).await.unwrap();

        // The first holder stalls past its lease; someone else takes over.
        fx.clock.advance(chrono::Duration::seconds(31));
        let _taken = fx.lock(LIFETIME).acquire(&second, RESOURCE, Duration::ZERO).await.unwrap();
        let taken_until = expire_at(&fx);

        tokio::time::sleep(LIFETIME / 5 + Duration::from_millis(1)).await;
        drop(stalled);

        let row = record(&fx).unwrap();
        assert_eq!(row.holder, Some(second));
        assert!(row.expire_at >= taken_until);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lease_is_not_reentered() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let first = LockOwnerId::generate();
        let _stalled = lock.acquire(&first, RESOURCE, Duration::ZERO).await.unwrap();

        fx.clock.advance(chrono::Duration::seconds(31));
        let second = LockOwnerId::generate();
        let _taken = fx.lock(LIFETIME).acquire(&second, RESOURCE, Duration::ZERO).await.unwrap();
        // Let the stalled heartbeat notice the takeover.
        tokio::time::sleep(LIFETIME / 5 + Duration::from_millis(1)).await;

        let err = lock.acquire(&first, RESOURCE, Duration::ZERO).await.unwrap_err();

        assert!(matches!(err, StorageError::LockTimeout { .. }));
        assert_eq!(lock.registry().hold_count(RESOURCE, first), 1);
        assert_eq!(record(&fx).unwrap().holder, Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lease_can_be_won_back_once_free() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let first = LockOwnerId::generate();
        let stalled = lock.acquire(&first, RESOURCE, Duration::ZERO).await.unwrap();

        fx.clock.advance(chrono::Duration::seconds(31));
        let second = LockOwnerId::generate();
        let taken = fx.lock(LIFETIME).acquire(&second, RESOURCE, Duration::ZERO).await.unwrap();
        tokio::time::sleep(LIFETIME / 5 + Duration::from_millis(1)).await;
        drop(taken);

        let regained = lock.acquire(&first, RESOURCE, Duration::ZERO).await.unwrap();
        assert_eq!(lock.registry().hold_count(RESOURCE, first), 2);
        assert_eq!(record(&fx).unwrap().holder, Some(first));

        drop(stalled);
        assert_eq!(record(&fx).unwrap().holder, Some(first));
        drop(regained);
        assert_eq!(record(&fx).unwrap().holder, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_waiting() {
        let fx = Fixture::new();
        let lock = fx.lock(LIFETIME);
        let _held = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::ZERO)
            .await
            .unwrap();
        let token = CancellationToken::new();

        let waiter = tokio::spawn({
            let lock = lock.clone();
            let token = token.clone();
            async move {
                lock.acquire_cancellable(
                    &LockOwnerId::generate(),
                    RESOURCE,
                    Duration::from_secs(3600),
                    &token,
                )
                .await
                .map(|_| ())
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(StorageError::Cancelled)));
    }

    #[tokio::test]
    async fn rejects_blank_resource() {
        let fx = Fixture::new();
        let err = fx
            .lock(LIFETIME)
            .acquire(&LockOwnerId::generate(), "  ", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument { name: "resource", .. }));
    }

    #[test]
    fn rejects_zero_lifetime() {
        let fx = Fixture::new();
        let result = DistributedLock::new(
            fx.store.clone(),
            fx.dyn_clock(),
            Arc::new(LockRegistry::new()),
            Duration::ZERO,
        );
        assert!(matches!(result, Err(StorageError::InvalidOptions(_))));
    }

    struct BrokenStore;

    impl Store for BrokenStore {
        fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StorageError> {
            Ok(f(&Tables::default()))
        }

        fn write<T>(
            &self,
            _f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StorageError>,
        ) -> Result<T, StorageError> {
            Err(StoreError::Backend("disk unavailable".into()).into())
        }
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_acquisition_failure() {
        let fx = Fixture::new();
        let lock = DistributedLock::new(
            Arc::new(BrokenStore),
            fx.dyn_clock(),
            Arc::new(LockRegistry::new()),
            LIFETIME,
        )
        .unwrap();

        let err = lock
            .acquire(&LockOwnerId::generate(), RESOURCE, Duration::from_secs(10))
            .await
            .unwrap_err();

        match err {
            StorageError::LockAcquisitionFailed { resource, source } => {
                assert_eq!(resource, RESOURCE);
                assert!(matches!(*source, StorageError::Store(StoreError::Backend(_))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn guard_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<LockGuard<InMemoryStore>>();
        assert_send::<DistributedLock<InMemoryStore>>();
    }
}
