//! Errors - 同期的に呼び出し元へ返るエラー
//!
//! Work の失敗（WorkFailure / Timeout / panic / cancel）はここには含めない。
//! それらは TaskRunner がデータ（`StatusRecord` の error）に変換して
//! StatusStore に書き込む。

use thiserror::Error;

use super::ids::TaskId;

/// SpoolError is returned synchronously by the dispatcher and the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpoolError {
    /// Caller misuse: the id was empty (or whitespace only).
    #[error("invalid task id: must not be empty")]
    InvalidId,

    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Task ids are never reused.
    #[error("task id already in use: {0}")]
    DuplicateId(TaskId),

    #[error("runner busy: {limit} tasks already in flight")]
    Busy { limit: usize },

    #[error("runner is shutting down")]
    ShuttingDown,

    /// Backend failure of a StatusStore implementation.
    #[error("status store error: {0}")]
    Store(String),
}
