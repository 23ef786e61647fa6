//! Events - タスクのライフサイクルイベント
//!
//! StatusStore への書き込みごとに 1 つ発行される（Discarded を除く）。
//! EventSink 経由で購読者に届く。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::TaskId;
use super::state::{FailureKind, TaskStatus};

/// A lifecycle event, emitted after the matching status write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// `pending` was written.
    Created { task_id: TaskId, at: DateTime<Utc> },

    /// `running` was written.
    Started { task_id: TaskId, at: DateTime<Utc> },

    /// `done` was written.
    Completed { task_id: TaskId, at: DateTime<Utc> },

    /// `error` was written.
    Failed {
        task_id: TaskId,
        kind: FailureKind,
        error: String,
        at: DateTime<Utc>,
    },

    /// The work finished after the task had already become terminal
    /// (timeout or cancel); its outcome was dropped. No status write.
    Discarded { task_id: TaskId, at: DateTime<Utc> },
}

impl TaskEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::Created { task_id, .. }
            | TaskEvent::Started { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Discarded { task_id, .. } => task_id,
        }
    }

    /// The status written alongside this event, if any.
    pub fn status(&self) -> Option<TaskStatus> {
        match self {
            TaskEvent::Created { .. } => Some(TaskStatus::Pending),
            TaskEvent::Started { .. } => Some(TaskStatus::Running),
            TaskEvent::Completed { .. } => Some(TaskStatus::Done),
            TaskEvent::Failed { .. } => Some(TaskStatus::Error),
            TaskEvent::Discarded { .. } => None,
        }
    }
}
