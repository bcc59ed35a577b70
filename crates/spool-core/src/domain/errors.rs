//! Errors - エラー型と分類
//!
//! 呼び出し側がリトライ可否を判断できるよう、`ErrorKind` で運用分類します。

use thiserror::Error;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（ストアの障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Failure reported by the persistent store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is poisoned: a previous transaction panicked while holding it")]
    Poisoned,

    #[error("store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("invalid storage options: {0}")]
    InvalidOptions(String),

    #[error("timeout expired while waiting for lock on resource `{resource}`")]
    LockTimeout { resource: String },

    #[error("failed to acquire lock on resource `{resource}`")]
    LockAcquisitionFailed {
        resource: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StorageError {
    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidOptions(_) | Self::Cancelled => {
                ErrorKind::Permanent
            }
            Self::LockTimeout { .. } => ErrorKind::Transient,
            Self::LockAcquisitionFailed { .. } | Self::Store(_) => ErrorKind::Infrastructure,
        }
    }

    /// Lock timeouts and store failures are worth another attempt on the
    /// caller's next scheduled pass.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Permanent)
    }

    /// Resource name for lock related failures.
    pub fn lock_resource(&self) -> Option<&str> {
        match self {
            Self::LockTimeout { resource } | Self::LockAcquisitionFailed { resource, .. } => {
                Some(resource)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::error::Error as _;

    #[rstest]
    #[case::argument(StorageError::invalid_argument("queues", "empty"), ErrorKind::Permanent)]
    #[case::cancelled(StorageError::Cancelled, ErrorKind::Permanent)]
    #[case::timeout(StorageError::LockTimeout { resource: "r".into() }, ErrorKind::Transient)]
    #[case::store(StorageError::Store(StoreError::Poisoned), ErrorKind::Infrastructure)]
    fn classifies_errors(#[case] err: StorageError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.is_retryable(), kind != ErrorKind::Permanent);
    }

    #[test]
    fn acquisition_failure_keeps_cause() {
        let err = StorageError::LockAcquisitionFailed {
            resource: "locks:sweep".into(),
            source: Box::new(StoreError::Backend("disk full".into()).into()),
        };

        assert_eq!(err.lock_resource(), Some("locks:sweep"));
        assert!(err.to_string().contains("locks:sweep"));
        let cause = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(cause.contains("disk full"));
    }

    #[test]
    fn timeout_message_names_resource() {
        let err = StorageError::LockTimeout {
            resource: "locks:expirationmanager".into(),
        };
        assert!(err.to_string().contains("locks:expirationmanager"));
    }
}
