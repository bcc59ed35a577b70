//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部の協調者（永続ストア、時刻、ID 採番、ジョブフレームワーク）
//! とのインターフェースを定義し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 永続ストアが source of truth（正本）
//! - プロセス間の安全性はストアのトランザクションと分散ロックだけで保証する
//! - プロセス内の通知（セマフォ）は待ち時間の最適化にすぎない

pub mod clock;
pub mod id_generator;
pub mod job_queue;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_queue::{FetchedJobHandle, PersistentJobQueue};
pub use self::store::{Collection, Record, Store, Tables, Transaction};
