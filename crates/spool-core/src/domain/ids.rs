//! Task identifiers.
//!
//! A `TaskId` is either chosen by the caller (e.g. a scan id coming from an
//! HTTP layer) or generated by an [`IdGenerator`](crate::ports::IdGenerator).
//! The only validity rule is "not empty"; an id made only of whitespace is
//! treated as empty.
//!
//! 生成 ID は ULID ベース（`task-<ULID>`）なので時刻順にソートできる。

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::errors::SpoolError;

/// Display で使うプレフィックス（生成 ID のみ）
const GENERATED_PREFIX: &str = "task-";

/// Identifier of a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Validate and wrap a caller-supplied id.
    pub fn new(value: impl Into<String>) -> Result<Self, SpoolError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(SpoolError::InvalidId);
        }
        Ok(Self(value))
    }

    /// System-generated id from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{GENERATED_PREFIX}{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for TaskId {
    type Error = SpoolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for TaskId {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
