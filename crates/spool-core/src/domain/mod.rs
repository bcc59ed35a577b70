//! Domain model (IDs, persisted records, errors).
//!
//! - ids: ULID ベースの型付き ID
//! - queue_entry / lock / expiring: ストアに永続化されるレコード
//! - errors: エラー型と分類

pub mod errors;
pub mod expiring;
pub mod ids;
pub mod lock;
pub mod queue_entry;

pub use self::errors::{ErrorKind, StorageError, StoreError};
pub use self::expiring::{Expiring, HashField, JobRecord, ListItem, SetItem};
pub use self::ids::{Id, IdMarker, JobId, ListItemId, LockOwnerId, QueueEntryId};
pub use self::lock::LockRecord;
pub use self::queue_entry::QueueEntry;
