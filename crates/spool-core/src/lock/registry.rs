//! Reentrancy registry - プロセス内で保持中のロック
//!
//! 同じ owner が同じ resource を再取得した場合はカウントを増やすだけで、
//! ストアには触れません。カウントが 0 になった時点で本当に解放します。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;

use crate::domain::LockOwnerId;

/// Lease state shared between the heartbeat task and the releasing guard.
///
/// Both sides take `released` before touching the store, so a renewal can
/// never land after the release has cleared the record. `lost` is set by the
/// heartbeat once another owner has taken the record over.
#[derive(Debug, Default)]
pub(crate) struct Lease {
    released: Mutex<bool>,
    lost: AtomicBool,
}

impl Lease {
    pub(crate) fn lock(&self) -> MutexGuard<'_, bool> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub(crate) struct Held {
    count: usize,
    pub(crate) lease: Arc<Lease>,
    pub(crate) heartbeat: AbortHandle,
}

/// Locks currently held by this process, keyed by `(resource, owner)`.
///
/// Share one registry between every `DistributedLock` of a process; two
/// registries never see each other's holds.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashMap<(String, LockOwnerId), Held>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<(String, LockOwnerId), Held>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bump the hold count if `owner` already holds `resource` and its lease
    /// is still alive. A lost lease has to be won back through the store.
    pub(crate) fn reenter(&self, resource: &str, owner: LockOwnerId) -> bool {
        match self.held().get_mut(&(resource.to_owned(), owner)) {
            Some(held) if !held.lease.is_lost() => {
                held.count += 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn register(
        &self,
        resource: &str,
        owner: LockOwnerId,
        lease: Arc<Lease>,
        heartbeat: AbortHandle,
    ) {
        let mut held = self.held();
        match held.get_mut(&(resource.to_owned(), owner)) {
            // Outstanding guards from the lost lease now ride on the new one.
            Some(entry) => {
                entry.count += 1;
                entry.heartbeat.abort();
                entry.lease = lease;
                entry.heartbeat = heartbeat;
            }
            None => {
                held.insert(
                    (resource.to_owned(), owner),
                    Held {
                        count: 1,
                        lease,
                        heartbeat,
                    },
                );
            }
        }
    }

    /// Drop one hold; returns the entry once the last hold is gone.
    pub(crate) fn leave(&self, resource: &str, owner: LockOwnerId) -> Option<Held> {
        let mut held = self.held();
        let key = (resource.to_owned(), owner);
        let entry = held.get_mut(&key)?;
        entry.count -= 1;
        if entry.count > 0 {
            return None;
        }
        held.remove(&key)
    }

    /// How many times `owner` currently holds `resource`.
    pub fn hold_count(&self, resource: &str, owner: LockOwnerId) -> usize {
        self.held()
            .get(&(resource.to_owned(), owner))
            .map_or(0, |held| held.count)
    }
}
