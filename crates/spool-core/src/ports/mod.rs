//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（状態の保存先、実際の処理、イベントの配送先）
//! へのインターフェースを提供し、テストではダブルに差し替えられます。

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod status_store;
pub mod work;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::status_store::{StatusCounts, StatusStore};
pub use self::work::{Work, WorkFuture};
