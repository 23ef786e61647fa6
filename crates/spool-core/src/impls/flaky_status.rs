//! FlakyStatusStore - 書き込み失敗を注入できる StatusStore（テスト用）

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::InMemoryStatusStore;
use crate::domain::{SpoolError, StatusRecord, TaskId, TaskStatus};
use crate::ports::{StatusCounts, StatusStore};

/// InMemoryStatusStore whose `transition` fails a set number of times.
///
/// `running` writes and terminal writes have separate budgets;
/// `usize::MAX` means "always fail".
pub(crate) struct FlakyStatusStore<T> {
    inner: InMemoryStatusStore<T>,
    running_failures: AtomicUsize,
    terminal_failures: AtomicUsize,
}

impl<T> FlakyStatusStore<T> {
    pub(crate) fn new(running_failures: usize, terminal_failures: usize) -> Self {
        Self {
            inner: InMemoryStatusStore::new(),
            running_failures: AtomicUsize::new(running_failures),
            terminal_failures: AtomicUsize::new(terminal_failures),
        }
    }
}

fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            usize::MAX => Some(usize::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

#[async_trait]
impl<T> StatusStore<T> for FlakyStatusStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn set(&self, id: &TaskId, record: StatusRecord<T>) -> Result<(), SpoolError> {
        self.inner.set(id, record).await
    }

    async fn get(&self, id: &TaskId) -> Result<StatusRecord<T>, SpoolError> {
        self.inner.get(id).await
    }

    async fn create(&self, id: &TaskId, record: StatusRecord<T>) -> Result<(), SpoolError> {
        self.inner.create(id, record).await
    }

    async fn transition(&self, id: &TaskId, record: StatusRecord<T>) -> Result<bool, SpoolError> {
        let budget = if record.status() == TaskStatus::Running {
            &self.running_failures
        } else {
            &self.terminal_failures
        };
        if take(budget) {
            return Err(SpoolError::Store("injected write failure".to_string()));
        }
        self.inner.transition(id, record).await
    }

    async fn remove(&self, id: &TaskId) -> Result<Option<StatusRecord<T>>, SpoolError> {
        self.inner.remove(id).await
    }

    async fn counts(&self) -> Result<StatusCounts, SpoolError> {
        self.inner.counts().await
    }
}
