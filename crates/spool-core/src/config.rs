//! Storage options: poll interval, invisibility window, lock lease and sweep cadence.

use std::time::Duration;

use crate::domain::StorageError;

pub const DEFAULT_QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_SLIDING_INVISIBILITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_DISTRIBUTED_LOCK_LIFETIME: Duration = Duration::from_secs(30);
pub const DEFAULT_JOB_EXPIRATION_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_EXPIRATION_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Options recognized by the storage adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    /// How long an idle fetch loop sleeps before polling the store again.
    pub queue_poll_interval: Duration,
    /// How long a claimed queue entry stays invisible to other consumers.
    pub sliding_invisibility_timeout: Duration,
    /// Lease length of a distributed lock; heartbeats renew it every fifth.
    pub distributed_lock_lifetime: Duration,
    /// Pause between two expiration sweeps.
    pub job_expiration_check_interval: Duration,
    /// How long a sweep waits for the expiration lock.
    pub expiration_lock_timeout: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            queue_poll_interval: DEFAULT_QUEUE_POLL_INTERVAL,
            sliding_invisibility_timeout: DEFAULT_SLIDING_INVISIBILITY_TIMEOUT,
            distributed_lock_lifetime: DEFAULT_DISTRIBUTED_LOCK_LIFETIME,
            job_expiration_check_interval: DEFAULT_JOB_EXPIRATION_CHECK_INTERVAL,
            expiration_lock_timeout: DEFAULT_EXPIRATION_LOCK_TIMEOUT,
        }
    }
}

impl StorageOptions {
    /// Create options from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SPOOL_QUEUE_POLL_INTERVAL_MS` | `15000` |
    /// | `SPOOL_SLIDING_INVISIBILITY_TIMEOUT_MS` | `600000` |
    /// | `SPOOL_DISTRIBUTED_LOCK_LIFETIME_MS` | `30000` |
    /// | `SPOOL_JOB_EXPIRATION_CHECK_INTERVAL_MS` | `1800000` |
    /// | `SPOOL_EXPIRATION_LOCK_TIMEOUT_MS` | `300000` |
    ///
    /// Unparsable values fall back to the default; call [`validate`](Self::validate)
    /// (or build a `Storage`) to reject out-of-range ones.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            queue_poll_interval: millis(
                "SPOOL_QUEUE_POLL_INTERVAL_MS",
                DEFAULT_QUEUE_POLL_INTERVAL,
            ),
            sliding_invisibility_timeout: millis(
                "SPOOL_SLIDING_INVISIBILITY_TIMEOUT_MS",
                DEFAULT_SLIDING_INVISIBILITY_TIMEOUT,
            ),
            distributed_lock_lifetime: millis(
                "SPOOL_DISTRIBUTED_LOCK_LIFETIME_MS",
                DEFAULT_DISTRIBUTED_LOCK_LIFETIME,
            ),
            job_expiration_check_interval: millis(
                "SPOOL_JOB_EXPIRATION_CHECK_INTERVAL_MS",
                DEFAULT_JOB_EXPIRATION_CHECK_INTERVAL,
            ),
            expiration_lock_timeout: millis(
                "SPOOL_EXPIRATION_LOCK_TIMEOUT_MS",
                DEFAULT_EXPIRATION_LOCK_TIMEOUT,
            ),
        }
    }

    pub fn with_queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval = interval;
        self
    }

    pub fn with_sliding_invisibility_timeout(mut self, timeout: Duration) -> Self {
        self.sliding_invisibility_timeout = timeout;
        self
    }

    pub fn with_distributed_lock_lifetime(mut self, lifetime: Duration) -> Self {
        self.distributed_lock_lifetime = lifetime;
        self
    }

    pub fn with_job_expiration_check_interval(mut self, interval: Duration) -> Self {
        self.job_expiration_check_interval = interval;
        self
    }

    pub fn with_expiration_lock_timeout(mut self, timeout: Duration) -> Self {
        self.expiration_lock_timeout = timeout;
        self
    }

    /// Fail fast on options the storage cannot honor.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.queue_poll_interval.is_zero() {
            return Err(StorageError::InvalidOptions(
                "queue_poll_interval must be positive".into(),
            ));
        }
        if self.sliding_invisibility_timeout.is_zero() {
            return Err(StorageError::InvalidOptions(
                "sliding_invisibility_timeout must be positive".into(),
            ));
        }
        if self.distributed_lock_lifetime.is_zero() {
            return Err(StorageError::InvalidOptions(
                "distributed_lock_lifetime must be positive".into(),
            ));
        }
        if self.job_expiration_check_interval.as_millis() > i32::MAX as u128 {
            return Err(StorageError::InvalidOptions(format!(
                "job_expiration_check_interval must not exceed {} ms",
                i32::MAX
            )));
        }
        to_chrono(
            "sliding_invisibility_timeout",
            self.sliding_invisibility_timeout,
        )?;
        to_chrono("distributed_lock_lifetime", self.distributed_lock_lifetime)?;
        Ok(())
    }
}

/// Timestamps are chrono values; durations arrive as std.
pub(crate) fn to_chrono(name: &'static str, duration: Duration) -> Result<chrono::Duration, StorageError> {
    chrono::Duration::from_std(duration)
        .map_err(|_| StorageError::InvalidOptions(format!("{name} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let options = StorageOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.sliding_invisibility_timeout, Duration::from_secs(600));
        assert_eq!(options.distributed_lock_lifetime, Duration::from_secs(30));
        assert_eq!(options.job_expiration_check_interval, Duration::from_secs(1800));
    }

    #[rstest]
    #[case::zero_poll(StorageOptions::default().with_queue_poll_interval(Duration::ZERO))]
    #[case::zero_invisibility(
        StorageOptions::default().with_sliding_invisibility_timeout(Duration::ZERO)
    )]
    #[case::zero_lock_lifetime(
        StorageOptions::default().with_distributed_lock_lifetime(Duration::ZERO)
    )]
    #[case::check_interval_overflows_i32(
        StorageOptions::default()
            .with_job_expiration_check_interval(Duration::from_millis(i32::MAX as u64 + 1))
    )]
    #[case::invisibility_out_of_range(
        StorageOptions::default().with_sliding_invisibility_timeout(Duration::MAX)
    )]
    fn rejects_invalid_options(#[case] options: StorageOptions) {
        assert!(matches!(
            options.validate(),
            Err(StorageError::InvalidOptions(_))
        ));
    }

    #[test]
    fn largest_check_interval_is_accepted() {
        let options = StorageOptions::default()
            .with_job_expiration_check_interval(Duration::from_millis(i32::MAX as u64));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SPOOL_QUEUE_POLL_INTERVAL_MS", "250"),
            ("SPOOL_DISTRIBUTED_LOCK_LIFETIME_MS", "not-a-number"),
        ]);
        let options = StorageOptions::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(options.queue_poll_interval, Duration::from_millis(250));
        assert_eq!(
            options.distributed_lock_lifetime,
            DEFAULT_DISTRIBUTED_LOCK_LIFETIME
        );
    }
}
