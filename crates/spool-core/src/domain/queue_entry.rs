//! Queue entry: one job's presence in one named queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, QueueEntryId};

/// Persisted row of the queue table.
///
/// `fetched_at == None` means visible to every consumer of `queue`.
/// A claimed entry stays invisible for the sliding invisibility timeout and
/// becomes eligible again afterwards, so an abandoned claim needs no reaper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub created: DateTime<Utc>,
    pub job_id: JobId,
    pub queue: String,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(
        id: QueueEntryId,
        job_id: JobId,
        queue: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            created,
            job_id,
            queue: queue.into(),
            fetched_at: None,
        }
    }

    /// Can a consumer claim this entry at `now`?
    ///
    /// A previous claim expires strictly after `invisibility_timeout`.
    pub fn is_eligible_at(&self, now: DateTime<Utc>, invisibility_timeout: Duration) -> bool {
        match self.fetched_at {
            None => true,
            Some(fetched_at) => fetched_at + invisibility_timeout < now,
        }
    }

    /// Claim (Visible -> Invisible).
    pub fn mark_fetched(&mut self, now: DateTime<Utc>) {
        self.fetched_at = Some(now);
    }

    /// Make visible again (Invisible -> Visible).
    pub fn requeue(&mut self) {
        self.fetched_at = None;
    }
}
