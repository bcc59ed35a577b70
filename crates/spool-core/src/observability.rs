use serde::{Deserialize, Serialize};

/// Entries of one queue, split by visibility at the time of the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Visible: never fetched, requeued, or whose claim has lapsed.
    pub enqueued: usize,
    /// Claimed by a consumer and still inside the invisibility window.
    pub fetched: usize,
}
