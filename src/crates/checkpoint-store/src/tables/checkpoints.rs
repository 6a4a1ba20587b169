//! Committed checkpoints and their lineage

use super::CheckpointKey;
use crate::backend::{MemoryBackend, StorageBackend};
use crate::checkpoint::CheckpointId;
use crate::error::Result;
use crate::serializer::TypedBlob;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A committed checkpoint as it is kept at rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Core state, channel values stripped
    pub checkpoint: TypedBlob,
    pub metadata: TypedBlob,
    pub parent_checkpoint_id: Option<CheckpointId>,
}

/// All checkpoints of one thread: `checkpoint_ns -> checkpoint_id -> checkpoint`
pub type NamespaceCheckpoints = BTreeMap<String, BTreeMap<CheckpointId, StoredCheckpoint>>;

/// Hierarchical index `thread_id -> checkpoint_ns -> checkpoint_id`
pub struct CheckpointTable {
    backend: Box<dyn StorageBackend<String, NamespaceCheckpoints>>,
}

impl CheckpointTable {
    pub fn new(backend: Box<dyn StorageBackend<String, NamespaceCheckpoints>>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Insert or replace the checkpoint at `key`
    pub fn insert(&mut self, key: &CheckpointKey, stored: StoredCheckpoint) {
        if self.backend.get(&key.thread_id).is_none() {
            self.backend.set(key.thread_id.clone(), NamespaceCheckpoints::new());
        }
        if let Some(namespaces) = self.backend.get_mut(&key.thread_id) {
            namespaces
                .entry(key.checkpoint_ns.clone())
                .or_default()
                .insert(key.checkpoint_id.clone(), stored);
        }
    }

    pub fn get(&self, key: &CheckpointKey) -> Option<&StoredCheckpoint> {
        self.backend
            .get(&key.thread_id)?
            .get(&key.checkpoint_ns)?
            .get(&key.checkpoint_id)
    }

    /// Checkpoint with the greatest ID in `(thread_id, checkpoint_ns)`
    pub fn latest(&self, thread_id: &str, checkpoint_ns: &str) -> Option<(CheckpointKey, &StoredCheckpoint)> {
        let (checkpoint_id, stored) = self
            .backend
            .get(&thread_id.to_string())?
            .get(checkpoint_ns)?
            .last_key_value()?;
        Some((
            CheckpointKey::new(thread_id, checkpoint_ns, checkpoint_id.clone()),
            stored,
        ))
    }

    /// Keys for a listing, in output order: threads and namespaces ascending,
    /// checkpoint IDs descending.
    ///
    /// `checkpoint_id` keeps only that ID; `before` keeps only IDs strictly below it.
    pub fn candidates(
        &self,
        thread_id: Option<&str>,
        checkpoint_ns: Option<&str>,
        checkpoint_id: Option<&str>,
        before: Option<&str>,
    ) -> Vec<CheckpointKey> {
        let thread_ids = match thread_id {
            Some(id) => vec![id.to_string()],
            None => self.backend.keys(),
        };

        let mut keys = Vec::new();
        for thread_id in thread_ids {
            let Some(namespaces) = self.backend.get(&thread_id) else {
                continue;
            };
            for (ns, checkpoints) in namespaces {
                if checkpoint_ns.is_some_and(|wanted| wanted != ns.as_str()) {
                    continue;
                }
                for id in checkpoints.keys().rev() {
                    if checkpoint_id.is_some_and(|wanted| wanted != id.as_str()) {
                        continue;
                    }
                    if before.is_some_and(|cursor| id.as_str() >= cursor) {
                        continue;
                    }
                    keys.push(CheckpointKey::new(thread_id.clone(), ns.clone(), id.clone()));
                }
            }
        }
        keys
    }

    /// Remove a whole thread, returning how many checkpoints it held
    pub fn delete_thread(&mut self, thread_id: &str) -> usize {
        self.backend
            .delete(&thread_id.to_string())
            .map(|namespaces| namespaces.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn thread_count(&self) -> usize {
        self.backend.len()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.backend
            .keys()
            .iter()
            .filter_map(|thread_id| self.backend.get(thread_id))
            .flat_map(|namespaces| namespaces.values())
            .map(BTreeMap::len)
            .sum()
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
