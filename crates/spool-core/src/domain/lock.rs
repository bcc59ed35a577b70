//! Lock record: a named lease shared by every process using the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::LockOwnerId;

/// Persisted row of the lock table.
///
/// Rows are created lazily on the first acquisition attempt and reused
/// forever after; releasing clears the lease instead of deleting the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub expire_at: Option<DateTime<Utc>>,
    pub holder: Option<LockOwnerId>,
}

impl LockRecord {
    /// Free lock row.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            expire_at: None,
            holder: None,
        }
    }

    /// Is the lease live at `now`? A lease whose expiry has passed is free.
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|expire_at| expire_at > now)
    }

    /// Is `owner` the holder of a live lease at `now`?
    pub fn is_held_by(&self, owner: LockOwnerId, now: DateTime<Utc>) -> bool {
        self.holder == Some(owner) && self.is_held_at(now)
    }

    /// Take the lease (caller checked that it is free).
    pub fn grant(&mut self, owner: LockOwnerId, now: DateTime<Utc>, lifetime: Duration) {
        self.expire_at = Some(now + lifetime);
        self.holder = Some(owner);
    }

    /// Push the expiry forward by `lifetime` from `now`.
    pub fn renew(&mut self, now: DateTime<Utc>, lifetime: Duration) {
        self.expire_at = Some(now + lifetime);
    }

    pub fn release(&mut self) {
        self.expire_at = None;
        self.holder = None;
    }
}
