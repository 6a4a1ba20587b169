//! Staging area for task writes
//!
//! Writes are grouped by the checkpoint they were produced against. Inside a group
//! the pair `(task_id, index)` identifies a write:
//!
//! - a non-negative (ordinal) index is first-write-wins, so a re-executed task
//!   cannot replace its earlier output;
//! - a negative (reserved) index always overwrites.
//!
//! Writes keep the order in which they were first staged.

use super::CheckpointKey;
use crate::backend::{MemoryBackend, StorageBackend};
use crate::checkpoint::PendingWrite;
use crate::error::Result;
use crate::serializer::{SerializerProtocol, TypedBlob};
use serde::{Deserialize, Serialize};

/// A staged write as it is kept at rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWrite {
    pub task_id: String,
    pub index: i64,
    pub channel: String,
    pub value: TypedBlob,
    pub task_path: String,
}

/// Pending writes keyed by checkpoint
pub struct WriteBuffer {
    backend: Box<dyn StorageBackend<CheckpointKey, Vec<StoredWrite>>>,
}

impl WriteBuffer {
    pub fn new(backend: Box<dyn StorageBackend<CheckpointKey, Vec<StoredWrite>>>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Stage one write. Returns `false` when an ordinal duplicate was dropped.
    pub fn stage(&mut self, key: &CheckpointKey, write: StoredWrite) -> bool {
        if self.backend.get(key).is_none() {
            self.backend.set(key.clone(), Vec::new());
        }
        let Some(scope) = self.backend.get_mut(key) else {
            return false;
        };

        let existing = scope
            .iter()
            .position(|w| w.task_id == write.task_id && w.index == write.index);
        match existing {
            Some(_) if write.index >= 0 => false,
            Some(pos) => {
                scope[pos] = write;
                true
            }
            None => {
                scope.push(write);
                true
            }
        }
    }

    /// Raw writes staged against `key`
    pub fn get(&self, key: &CheckpointKey) -> &[StoredWrite] {
        self.backend.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decoded `(task_id, channel, value)` triples staged against `key`
    pub fn pending(
        &self,
        key: &CheckpointKey,
        serde: &dyn SerializerProtocol,
    ) -> Result<Vec<PendingWrite>> {
        self.get(key)
            .iter()
            .map(|w| {
                Ok((
                    w.task_id.clone(),
                    w.channel.clone(),
                    serde.loads_typed(&w.value)?,
                ))
            })
            .collect()
    }

    /// Remove every group belonging to `thread_id`, returning how many writes were removed
    pub fn delete_thread(&mut self, thread_id: &str) -> usize {
        let doomed: Vec<CheckpointKey> = self
            .backend
            .keys()
            .into_iter()
            .filter(|key| key.thread_id == thread_id)
            .collect();
        doomed
            .iter()
            .filter_map(|key| self.backend.delete(key))
            .map(|scope| scope.len())
            .sum()
    }

    /// Number of checkpoints with at least one staged write group
    pub fn scope_count(&self) -> usize {
        self.backend.len()
    }

    pub fn clear(&mut self) {
        self.backend.clear();
    }

    pub fn sync(&mut self) -> Result<()> {
        self.backend.sync()
    }

    pub fn close(&mut self) -> Result<()> {
        self.backend.close()
    }
}
