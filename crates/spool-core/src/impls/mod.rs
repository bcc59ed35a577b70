//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: プロセス内の組み込みストア（開発・テスト用）
//!
//! ファイルや外部エンジンに永続化する `Store` は別クレートに置く想定です。

pub mod inmem_store;

pub use self::inmem_store::InMemoryStore;
