//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStatusStore**: DashMap ベースの StatusStore
//! - **BroadcastEventSink**: tokio broadcast でイベントを配送
//!
//! 永続化する StatusStore（PG / Redis など）は別クレートに置く想定。

pub mod broadcast_events;
#[cfg(test)]
pub(crate) mod flaky_status;
pub mod inmem_status;

// 主要な型を再エクスポート
pub use self::broadcast_events::BroadcastEventSink;
pub use self::inmem_status::InMemoryStatusStore;
