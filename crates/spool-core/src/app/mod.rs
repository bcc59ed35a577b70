//! App - アプリケーション層
//!
//! ports と queue / lock を組み合わせて、ジョブフレームワークに渡す窓口を作ります。
//!
//! # 主要コンポーネント
//! - **StorageBuilder**: 構築とワイヤリング（起動時検証）
//! - **Storage**: ロック・キュー・スイープの窓口
//! - **ExpirationManager / ExpirationRunner**: 期限切れエンティティの定期削除

pub mod builder;
pub mod expiration;
pub mod storage;

pub use self::builder::StorageBuilder;
pub use self::expiration::{
    EXPIRATION_LOCK_RESOURCE, ExpirationManager, ExpirationRunner, SweepReport,
};
pub use self::storage::Storage;
