//! Domain identifiers (strongly-typed IDs).
//!
//! すべての ID は ULID ベースで、Phantom type パターンで型を区別します。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 同じミリ秒内でなければ生成順にソートできる
//! - **分散生成可能**: 複数プロセスが調整なしで ID を発行できる
//! - **128-bit**: ストアの主キーとしてそのまま使える
//!
//! `JobId` はフレームワーク側が所有するジョブへの参照です（このクレートは
//! 所有しない）。`QueueEntryId` / `ListItemId` はストアが採番する主キー、
//! `LockOwnerId` は分散ロックの保持者（論理コンテキスト）を表します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"job-", "entry-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のメモリは Ulid と同じ 16 bytes です。
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

// derive だと `T: Clone` などの境界が付いてしまうので手で実装する
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Display と逆向きの変換。プレフィックスは省略可。
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Job のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// QueueEntry のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueEntry {}

impl IdMarker for QueueEntry {
    fn prefix() -> &'static str {
        "entry-"
    }
}

/// ListItem のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListItem {}

impl IdMarker for ListItem {
    fn prefix() -> &'static str {
        "item-"
    }
}

/// LockOwner のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockOwner {}

impl IdMarker for LockOwner {
    fn prefix() -> &'static str {
        "owner-"
    }
}

// ========================================
// Type Alias
// ========================================

/// Identifier of a job owned by the job framework.
pub type JobId = Id<Job>;

/// Identifier of one job's presence in one queue.
pub type QueueEntryId = Id<QueueEntry>;

/// Identifier of a list element (lists allow duplicate values).
pub type ListItemId = Id<ListItem>;

/// Identifier of a logical lock holder (reentrancy context).
pub type LockOwnerId = Id<LockOwner>;

impl LockOwnerId {
    /// Fresh owner for a new logical context.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }
}
