//! Entities removed by the expiration sweep once their `expire_at` passes.
//!
//! Only the shape the sweep needs lives here; reading and writing these
//! records is the job framework's business.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, ListItemId};

/// Anything carrying an optional expiry timestamp.
pub trait Expiring {
    fn expire_at(&self) -> Option<DateTime<Utc>>;

    /// `None` never expires; otherwise expired once `expire_at` has passed.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at().is_some_and(|expire_at| expire_at < now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub created: DateTime<Utc>,
    pub state_name: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: JobId, created: DateTime<Utc>) -> Self {
        Self {
            id,
            created,
            state_name: None,
            expire_at: None,
        }
    }

    pub fn with_expire_at(mut self, expire_at: DateTime<Utc>) -> Self {
        self.expire_at = Some(expire_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: ListItemId,
    pub key: String,
    pub value: String,
    pub expire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetItem {
    pub key: String,
    pub value: String,
    pub score: f64,
    pub expire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashField {
    pub key: String,
    pub field: String,
    pub value: String,
    pub expire_at: Option<DateTime<Utc>>,
}

impl Expiring for JobRecord {
    fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }
}

impl Expiring for ListItem {
    fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }
}

impl Expiring for SetItem {
    fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }
}

impl Expiring for HashField {
    fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }
}
