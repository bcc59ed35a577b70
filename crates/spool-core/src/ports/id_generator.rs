//! IdGenerator port - ID 生成の抽象化
//!
//! ストアが採番する主キー（QueueEntryId, ListItemId）と、フレームワーク側で
//! 使う JobId を生成します。テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{Id, IdMarker, JobId, ListItemId, LockOwnerId, QueueEntryId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_queue_entry_id(&self) -> QueueEntryId;

    fn generate_list_item_id(&self) -> ListItemId;

    fn generate_lock_owner_id(&self) -> LockOwnerId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// FixedClock を渡すと timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn generate<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        self.generate()
    }

    fn generate_queue_entry_id(&self) -> QueueEntryId {
        self.generate()
    }

    fn generate_list_item_id(&self) -> ListItemId {
        self.generate()
    }

    fn generate_lock_owner_id(&self) -> LockOwnerId {
        self.generate()
    }
}
