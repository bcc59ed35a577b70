//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::StorageOptions;
use crate::domain::JobId;
use crate::impls::InMemoryStore;
use crate::lock::{DistributedLock, LockRegistry};
use crate::ports::{Clock, FixedClock, IdGenerator, UlidGenerator};
use crate::queue::{JobQueue, JobQueueSemaphore};

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn fast_options() -> StorageOptions {
    StorageOptions::default().with_queue_poll_interval(Duration::from_millis(10))
}

/// One store seen by one process: shared clock, ids and semaphore.
pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub ids: Arc<dyn IdGenerator>,
    pub semaphore: Arc<JobQueueSemaphore>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = Arc::new(FixedClock::new(start_time()));
        Self {
            store: Arc::new(InMemoryStore::new()),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            semaphore: Arc::new(JobQueueSemaphore::new()),
        }
    }

    pub fn dyn_clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn queue(&self, options: &StorageOptions) -> JobQueue<InMemoryStore> {
        JobQueue::new(
            Arc::clone(&self.store),
            self.dyn_clock(),
            Arc::clone(&self.ids),
            Arc::clone(&self.semaphore),
            options,
        )
        .unwrap()
    }

    /// Another process on the same store: its own semaphore, same data.
    pub fn other_process(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            semaphore: Arc::new(JobQueueSemaphore::new()),
        }
    }

    pub fn lock(&self, lifetime: Duration) -> DistributedLock<InMemoryStore> {
        DistributedLock::new(
            Arc::clone(&self.store),
            self.dyn_clock(),
            Arc::new(LockRegistry::new()),
            lifetime,
        )
        .unwrap()
    }

    pub fn job_id(&self) -> JobId {
        self.ids.generate_job_id()
    }
}
