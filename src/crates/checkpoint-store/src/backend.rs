//! Pluggable key-value containers behind the checkpoint tables
//!
//! Each table of [`InMemoryCheckpointSaver`](crate::memory::InMemoryCheckpointSaver)
//! owns a `Box<dyn StorageBackend<K, V>>`. [`MemoryBackend`] keeps everything in a
//! `BTreeMap`; [`PersistentMap`](crate::persistent::PersistentMap) does the same and
//! additionally commits the whole map to a file on [`sync`](StorageBackend::sync).

use crate::error::Result;
use std::collections::BTreeMap;

/// Minimal mapping interface the checkpoint tables are written against
///
/// Iteration order of [`keys`](Self::keys) must be ascending by `K`.
pub trait StorageBackend<K, V>: Send + Sync {
    /// Borrow the value stored under `key`
    fn get(&self, key: &K) -> Option<&V>;

    /// Mutably borrow the value stored under `key`
    fn get_mut(&mut self, key: &K) -> Option<&mut V>;

    /// Store `value` under `key`, returning the previous value
    fn set(&mut self, key: K, value: V) -> Option<V>;

    /// Remove `key`, returning its value
    fn delete(&mut self, key: &K) -> Option<V>;

    /// All keys in ascending order
    fn keys(&self) -> Vec<K>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Whether the backend holds no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    fn clear(&mut self);

    /// Make the current contents durable. In-memory backends have nothing to do.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    /// Final sync before the backend is dropped
    fn close(&mut self) -> Result<()> {
        self.sync()
    }
}

/// Plain in-memory backend
#[derive(Debug, Clone)]
pub struct MemoryBackend<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> MemoryBackend<K, V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> Default for MemoryBackend<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> StorageBackend<K, V> for MemoryBackend<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    fn set(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    fn delete(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
