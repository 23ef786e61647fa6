//! InMemoryStatusStore - DashMap ベースの StatusStore
//!
//! # 学習ポイント
//! - DashMap は shard 単位でロックする: 同じ id への書き込みは直列化され、
//!   読み出しは shard の read lock だけで済む
//! - `entry()` / `get_mut()` でチェックと書き込みを 1 つのロック区間で行う
//!   （check-then-act の競合を避ける）

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::{SpoolError, StatusRecord, TaskId};
use crate::ports::{StatusCounts, StatusStore};

/// Thread-safe in-memory status store.
pub struct InMemoryStatusStore<T> {
    records: DashMap<TaskId, StatusRecord<T>>,
}

impl<T> InMemoryStatusStore<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for InMemoryStatusStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> StatusStore<T> for InMemoryStatusStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn set(&self, id: &TaskId, record: StatusRecord<T>) -> Result<(), SpoolError> {
        self.records.insert(id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<StatusRecord<T>, SpoolError> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }

    async fn create(&self, id: &TaskId, record: StatusRecord<T>) -> Result<(), SpoolError> {
        match self.records.entry(id.clone()) {
            Entry::Occupied(_) => Err(SpoolError::DuplicateId(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn transition(&self, id: &TaskId, record: StatusRecord<T>) -> Result<bool, SpoolError> {
        let mut current = self
            .records
            .get_mut(id)
            .ok_or_else(|| SpoolError::NotFound(id.clone()))?;
        if !current.status().can_transition_to(record.status()) {
            return Ok(false);
        }
        *current = record;
        Ok(true)
    }

    async fn remove(&self, id: &TaskId) -> Result<Option<StatusRecord<T>>, SpoolError> {
        Ok(self.records.remove(id).map(|(_, record)| record))
    }

    async fn counts(&self) -> Result<StatusCounts, SpoolError> {
        let mut counts = StatusCounts::default();
        for entry in self.records.iter() {
            counts.record(entry.value().status());
        }
        Ok(counts)
    }
}
