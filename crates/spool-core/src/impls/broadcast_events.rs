//! BroadcastEventSink - tokio broadcast でイベントを配送
//!
//! ポーリングの代わりに購読したい呼び出し元向け。
//! 購読者がいない / 遅れている場合、イベントは失われる（StatusStore が正本）。

use tokio::sync::broadcast;

use crate::domain::TaskEvent;
use crate::ports::EventSink;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub struct BroadcastEventSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: TaskEvent) {
        // ignore send error: no subscribers is fine
        let _ = self.tx.send(event);
    }
}
