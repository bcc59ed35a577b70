//! InMemoryStore - 組み込みストアのプロセス内実装
//!
//! 開発・テスト用。複数の `Storage` / ワーカーで共有すれば、別プロセスが同じ
//! データベースファイルを開いている状況と同じ並行性を再現できます。

use std::sync::{Mutex, MutexGuard};

use crate::domain::{StorageError, StoreError};
use crate::ports::{Store, Tables, Transaction};

/// InMemoryStore はすべてのコレクションを 1 つの Mutex で守る
///
/// # 実装詳細
/// - 書き込みトランザクションは Mutex を握ったまま実行（直列化可能）
/// - 読み取りも同じ Mutex を握るので、途中状態は見えない
/// - トランザクション内で panic すると Mutex が poison され、以降は
///   `StoreError::Poisoned` を返す（undo ジャーナルは drop 時に巻き戻し済み）
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from pre-populated collections.
    pub fn with_tables(tables: Tables) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for InMemoryStore {
    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StorageError> {
        let tables = self.lock()?;
        Ok(f(&*tables))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut tables = self.lock()?;
        let mut tx = Transaction::begin(&mut *tables);
        match f(&mut tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }
}
