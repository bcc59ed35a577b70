//! Lease renewal while a lock is held.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::registry::Lease;
use crate::domain::{LockOwnerId, LockRecord, StorageError};
use crate::ports::{Clock, Store};

const MIN_PERIOD: Duration = Duration::from_millis(1);

enum Renewal {
    Renewed,
    Lost,
    Released,
}

pub(crate) struct Heartbeat<S> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
    pub lease: Arc<Lease>,
    pub resource: String,
    pub owner: LockOwnerId,
    pub lifetime: chrono::Duration,
}

impl<S: Store> Heartbeat<S> {
    /// Renew every `period` until released or the lease is lost.
    pub fn spawn(self, period: Duration) -> AbortHandle {
        let period = period.max(MIN_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.renew_once() {
                    Ok(Renewal::Renewed) => {
                        trace!(resource = %self.resource, "lock lease renewed");
                    }
                    Ok(Renewal::Released) => break,
                    Ok(Renewal::Lost) => {
                        self.lease.mark_lost();
                        warn!(
                            resource = %self.resource,
                            owner = %self.owner,
                            "lock lease lost before release; stopping heartbeat"
                        );
                        break;
                    }
                    Err(err) => {
                        warn!(resource = %self.resource, error = %err, "failed to renew lock lease");
                    }
                }
            }
            debug!(resource = %self.resource, "heartbeat stopped");
        })
        .abort_handle()
    }

    fn renew_once(&self) -> Result<Renewal, StorageError> {
        let released = self.lease.lock();
        if *released {
            return Ok(Renewal::Released);
        }
        let (owner, lifetime) = (self.owner, self.lifetime);
        self.store.write(|tx| {
            let now = self.clock.now();
            let ours = tx
                .get::<LockRecord>(&self.resource)
                .is_some_and(|record| record.is_held_by(owner, now));
            if !ours {
                return Ok(Renewal::Lost);
            }
            tx.update::<LockRecord>(&self.resource, |record| record.renew(now, lifetime));
            Ok(Renewal::Renewed)
        })
    }
}
