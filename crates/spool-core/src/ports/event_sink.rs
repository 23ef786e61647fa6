//! EventSink port - ライフサイクルイベントの配送
//!
//! # 実装
//! - NoopEventSink: 何もしない（デフォルト）
//! - BroadcastEventSink: tokio broadcast で購読者に配送（impls）

use crate::domain::TaskEvent;

/// EventSink receives one event per status write.
///
/// `emit` is called from worker tasks right after the store write; it must
/// not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: TaskEvent) {}
}
