//! Store port - 永続ストア（組み込みトランザクショナルオブジェクトストア）
//!
//! ストアが提供するもの：
//! - 主キーで引けるコレクション（`Collection`）
//! - 述語・順序付きの線形スキャン
//! - 複数レコードにまたがるアトミックな書き込みトランザクション
//! - トランザクション外の読み取り（スナップショット）
//!
//! # 設計原則
//! - 「空いているか？」の判定と、それに基づく書き込みは同一トランザクション内
//! - 書き込みはすべて undo ジャーナルに記録し、失敗時は完全にロールバック
//! - 他のトランザクションから途中状態は見えない

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{
    HashField, JobId, JobRecord, ListItem, ListItemId, LockRecord, QueueEntry, QueueEntryId,
    SetItem, StorageError,
};

/// A type persisted in one of the store's collections.
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    type Key: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    fn table(tables: &Tables) -> &Collection<Self>;

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self>;
}

/// Primary-key indexed collection.
pub struct Collection<R: Record> {
    rows: BTreeMap<R::Key, R>,
}

impl<R: Record> Default for Collection<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<R: Record> Clone for Collection<R> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
        }
    }
}

impl<R: Record> fmt::Debug for Collection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.rows.iter()).finish()
    }
}

impl<R: Record> Collection<R> {
    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    /// Rows in primary-key order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Every collection the storage adapter persists.
#[derive(Debug, Default, Clone)]
pub struct Tables {
    queue_entries: Collection<QueueEntry>,
    locks: Collection<LockRecord>,
    jobs: Collection<JobRecord>,
    list_items: Collection<ListItem>,
    set_items: Collection<SetItem>,
    hash_fields: Collection<HashField>,
}

impl Tables {
    pub fn get<R: Record>(&self, key: &R::Key) -> Option<&R> {
        R::table(self).get(key)
    }

    pub fn scan<R: Record>(&self) -> impl Iterator<Item = &R> {
        R::table(self).iter()
    }

    pub fn count<R: Record>(&self) -> usize {
        R::table(self).len()
    }
}

type Undo = Box<dyn FnOnce(&mut Tables)>;

/// Write transaction over [`Tables`].
///
/// Every mutation pushes its inverse onto an undo journal. `commit` discards
/// the journal; dropping an uncommitted transaction (error or panic) replays
/// it in reverse, so no partial write survives.
pub struct Transaction<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl<'a> Transaction<'a> {
    pub fn begin(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            undo: Vec::new(),
        }
    }

    pub fn commit(mut self) {
        self.undo.clear();
    }

    pub fn rollback(self) {
        drop(self);
    }

    pub fn get<R: Record>(&self, key: &R::Key) -> Option<&R> {
        R::table(&*self.tables).get(key)
    }

    pub fn scan<R: Record>(&self) -> impl Iterator<Item = &R> {
        R::table(&*self.tables).iter()
    }

    /// Upsert by primary key. Returns the replaced row, if any.
    pub fn insert<R: Record>(&mut self, record: R) -> Option<R> {
        let key = record.key();
        let previous = R::table_mut(self.tables)
            .rows
            .insert(key.clone(), record);

        let restore = previous.clone();
        self.undo.push(Box::new(move |tables| {
            let rows = &mut R::table_mut(tables).rows;
            match restore {
                Some(row) => {
                    rows.insert(key, row);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }));
        previous
    }

    pub fn remove<R: Record>(&mut self, key: &R::Key) -> Option<R> {
        let removed = R::table_mut(self.tables).rows.remove(key);
        if let Some(row) = &removed {
            let (key, row) = (key.clone(), row.clone());
            self.undo.push(Box::new(move |tables| {
                R::table_mut(tables).rows.insert(key, row);
            }));
        }
        removed
    }

    /// Mutate a row in place. `f` must not change the primary key.
    pub fn update<R: Record>(&mut self, key: &R::Key, f: impl FnOnce(&mut R)) -> Option<R> {
        let mut row = self.get::<R>(key)?.clone();
        f(&mut row);
        debug_assert!(&row.key() == key, "update must not change the primary key");
        self.insert(row.clone());
        Some(row)
    }

    /// Existing row for `key`, or insert the one built by `create`.
    pub fn find_or_create<R: Record>(&mut self, key: &R::Key, create: impl FnOnce() -> R) -> R {
        if let Some(row) = self.get::<R>(key) {
            return row.clone();
        }
        let row = create();
        self.insert(row.clone());
        row
    }

    /// Delete every row matching `predicate`; returns the deleted rows.
    pub fn remove_where<R: Record>(&mut self, mut predicate: impl FnMut(&R) -> bool) -> Vec<R> {
        let keys: Vec<R::Key> = self
            .scan::<R>()
            .filter(|row| predicate(row))
            .map(R::key)
            .collect();
        keys.iter().filter_map(|key| self.remove::<R>(key)).collect()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        while let Some(undo) = self.undo.pop() {
            undo(&mut *self.tables);
        }
    }
}

/// Store は組み込みオブジェクトストアの抽象
///
/// `write` のクロージャが `Err` を返すと、そのトランザクションの書き込みは
/// すべて取り消されてからエラーが呼び出し元へ返ります。
pub trait Store: Send + Sync + 'static {
    /// Read outside any write transaction (consistent snapshot).
    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StorageError>;

    /// Run `f` as one atomic write transaction.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError>;
}

impl Record for QueueEntry {
    type Key = QueueEntryId;

    fn key(&self) -> Self::Key {
        self.id
    }

    fn table(tables: &Tables) -> &Collection<Self> {
        &tables.queue_entries
    }

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self> {
        &mut tables.queue_entries
    }
}

impl Record for LockRecord {
    type Key = String;

    fn key(&self) -> Self::Key {
        self.resource.clone()
    }

    fn table(tables: &Tables) -> &Collection<Self> {
        &tables.locks
    }

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self> {
        &mut tables.locks
    }
}

impl Record for JobRecord {
    type Key = JobId;

    fn key(&self) -> Self::Key {
        self.id
    }

    fn table(tables: &Tables) -> &Collection<Self> {
        &tables.jobs
    }

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self> {
        &mut tables.jobs
    }
}

impl Record for ListItem {
    type Key = ListItemId;

    fn key(&self) -> Self::Key {
        self.id
    }

    fn table(tables: &Tables) -> &Collection<Self> {
        &tables.list_items
    }

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self> {
        &mut tables.list_items
    }
}

impl Record for SetItem {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.key.clone(), self.value.clone())
    }

    fn table(tables: &Tables) -> &Collection<Self> {
        &tables.set_items
    }

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self> {
        &mut tables.set_items
    }
}

impl Record for HashField {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.key.clone(), self.field.clone())
    }

    fn table(tables: &Tables) -> &Collection<Self> {
        &tables.hash_fields
    }

    fn table_mut(tables: &mut Tables) -> &mut Collection<Self> {
        &mut tables.hash_fields
    }
}
