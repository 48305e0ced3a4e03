//! App - アプリケーション層
//!
//! ports と signals を組み合わせて、Signal の登録・生成・実行を管理します。
//!
//! # 主要コンポーネント
//! - **SessionBuilder**: Session の構築とワイヤリング
//! - **ExecutorSession**: Factory registry + 共有 outbound channel + active な Signal
//! - **FactoryRegistry**: SignalType → SignalFactory の対応表
//! - **SessionConfig**: channel の容量と stop の timeout

pub mod builder;
pub mod config;
pub mod registry;
pub mod session;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SessionBuilder};
pub use self::config::SessionConfig;
pub use self::registry::FactoryRegistry;
pub use self::session::ExecutorSession;
