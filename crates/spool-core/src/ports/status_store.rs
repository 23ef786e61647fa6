//! StatusStore port - task id → StatusRecord の正本（source of truth）
//!
//! 書き込み元は Dispatcher（pending）と TaskRunner（running / terminal）、
//! 読み出し元はポーリングする呼び出し元。
//!
//! # 設計原則
//! - 同じ id への書き込みは直列化される
//! - terminal（done / error）は吸収状態: `transition` は terminal を上書きしない
//! - 異なる id 間の順序保証はない

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{SpoolError, StatusRecord, TaskId, TaskStatus};

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Done => self.done += 1,
            TaskStatus::Error => self.error += 1,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending + self.running
    }

    pub fn total(&self) -> usize {
        self.in_flight() + self.done + self.error
    }
}

/// Key-value record of task id → status.
#[async_trait]
pub trait StatusStore<T>: Send + Sync {
    /// Overwrite the record for `id`, creating it if absent.
    async fn set(&self, id: &TaskId, record: StatusRecord<T>) -> Result<(), SpoolError>;

    /// Current record, or `SpoolError::NotFound`.
    async fn get(&self, id: &TaskId) -> Result<StatusRecord<T>, SpoolError>;

    /// Insert only if `id` has no record yet, else `SpoolError::DuplicateId`.
    async fn create(&self, id: &TaskId, record: StatusRecord<T>) -> Result<(), SpoolError>;

    /// Replace the record only if the current status may move to the new
    /// one (see [`TaskStatus::can_transition_to`]). Returns whether the
    /// write was applied.
    async fn transition(&self, id: &TaskId, record: StatusRecord<T>) -> Result<bool, SpoolError>;

    /// Drop the record for `id`, returning it if present.
    async fn remove(&self, id: &TaskId) -> Result<Option<StatusRecord<T>>, SpoolError>;

    async fn counts(&self) -> Result<StatusCounts, SpoolError>;
}
