//! Status record: the observable lifecycle state of one task.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{FailureKind, TaskStatus};

/// The observable lifecycle state of a task.
///
/// Invariant: `result` is set only for `Done`, `error`/`error_kind` only for
/// `Error`, and a terminal record always carries exactly one of them.
/// Fields are private; the constructors are the only way to build a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord<T> {
    status: TaskStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,

    updated_at: DateTime<Utc>,
}

impl<T> StatusRecord<T> {
    pub fn pending(at: DateTime<Utc>) -> Self {
        Self::bare(TaskStatus::Pending, at)
    }

    pub fn running(at: DateTime<Utc>) -> Self {
        Self::bare(TaskStatus::Running, at)
    }

    pub fn done(result: T, at: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Done,
            result: Some(result),
            error: None,
            error_kind: None,
            updated_at: at,
        }
    }

    /// Terminal failure. An empty message is replaced by a default for `kind`
    /// so pollers never see a blank error.
    pub fn failed(kind: FailureKind, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = kind.default_message().to_string();
        }
        Self {
            status: TaskStatus::Error,
            result: None,
            error: Some(message),
            error_kind: Some(kind),
            updated_at: at,
        }
    }

    fn bare(status: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            result: None,
            error: None,
            error_kind: None,
            updated_at: at,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<FailureKind> {
        self.error_kind
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Consume the record, yielding the result of a `Done` task.
    pub fn into_result(self) -> Option<T> {
        self.result
    }
}
