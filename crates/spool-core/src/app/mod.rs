//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: Dispatcher の構築とワイヤリング
//! - **Dispatcher**: 公開エントリポイント（start / status / cancel / shutdown）
//! - **TaskRunner**: 1 タスクの実行（timeout / cancel / panic の封じ込め）
//! - **WorkerGroup**: 同時実行数に上限があるときのワーカープール
//! - **RunnerConfig**: timeout・同時実行数・あふれ時の方針

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod runner;
mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::config::{ConfigError, OverflowPolicy, RunnerConfig};
pub use self::dispatcher::Dispatcher;
pub use self::runner::{Job, TaskRunner};
