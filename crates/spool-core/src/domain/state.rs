//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Observable status of a task.
///
/// State transitions:
/// - Pending -> Running -> Done
/// - Pending -> Running -> Error
/// - Pending -> Error (cancelled or shut down before a worker picked it up)
///
/// `Done` and `Error` are terminal and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker.
    Pending,

    /// A worker is executing the work unit.
    Running,

    /// The work unit succeeded; the record carries its result.
    Done,

    /// The work unit failed, timed out, panicked or was cancelled.
    Error,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Whether a record in `self` may be replaced by a record in `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Error) | (Running, Done) | (Running, Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended in `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The work unit returned an error.
    Work,

    /// The work unit panicked.
    Panic,

    /// The work unit exceeded the configured deadline.
    Timeout,

    /// Cancelled by a caller or by shutdown.
    Cancelled,

    /// The status store kept rejecting the `running` write, so the work
    /// never ran.
    Store,
}

impl FailureKind {
    /// Used when a failure comes without any description.
    pub(crate) fn default_message(self) -> &'static str {
        match self {
            FailureKind::Work => "work failed without a message",
            FailureKind::Panic => "work panicked",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Store => "status store unavailable",
        }
    }
}
