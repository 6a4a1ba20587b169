//! Plugging a custom storage backend into the saver
//!
//! Each table of `InMemoryCheckpointSaver` is written against `StorageBackend`.
//! This example wraps `MemoryBackend` with a counter of mutations, then shows
//! that a channel which did not change between two checkpoints is stored once.

use checkpoint_store::tables::{BlobKey, CheckpointKey, NamespaceCheckpoints, StoredWrite};
use checkpoint_store::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, InMemoryCheckpointSaver,
    MemoryBackend, Result, StorageBackend, TypedBlob,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory backend that counts `set` calls
struct CountingBackend<K, V> {
    inner: MemoryBackend<K, V>,
    sets: Arc<AtomicUsize>,
}

impl<K: Ord, V> CountingBackend<K, V> {
    fn new(sets: Arc<AtomicUsize>) -> Self {
        Self {
            inner: MemoryBackend::new(),
            sets,
        }
    }
}

impl<K, V> StorageBackend<K, V> for CountingBackend<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    fn set(&mut self, key: K, value: V) -> Option<V> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &K) -> Option<V> {
        self.inner.delete(key)
    }

    fn keys(&self) -> Vec<K> {
        self.inner.keys()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn clear(&mut self) {
        self.inner.clear();
    }
}

fn main() -> Result<()> {
    let blob_sets = Arc::new(AtomicUsize::new(0));
    let checkpoints: MemoryBackend<String, NamespaceCheckpoints> = MemoryBackend::new();
    let blobs: CountingBackend<BlobKey, TypedBlob> = CountingBackend::new(blob_sets.clone());
    let writes: MemoryBackend<CheckpointKey, Vec<StoredWrite>> = MemoryBackend::new();
    let saver = InMemoryCheckpointSaver::with_backends(
        Box::new(checkpoints),
        Box::new(blobs),
        Box::new(writes),
    );

    let thread = CheckpointConfig::new().with_thread_id("example");
    let history_v = saver.get_next_version(None)?;
    let status_v1 = saver.get_next_version(None)?;

    let first = Checkpoint::empty()
        .with_channel("history", json!(["a long transcript"]), history_v.clone())
        .with_channel("status", json!("thinking"), status_v1.clone());
    let mut versions = HashMap::new();
    versions.insert("history".to_string(), history_v.clone());
    versions.insert("status".to_string(), status_v1.clone());
    let saved = saver.put(&thread, first, CheckpointMetadata::new().with_step(0), versions)?;

    // Only `status` changes; `history` keeps its version and is not written again
    let status_v2 = saver.get_next_version(Some(&status_v1))?;
    let second = Checkpoint::empty()
        .with_channel("history", json!(["a long transcript"]), history_v)
        .with_channel("status", json!("done"), status_v2.clone());
    let mut versions = HashMap::new();
    versions.insert("status".to_string(), status_v2);
    saver.put(&saved, second, CheckpointMetadata::new().with_step(1), versions)?;

    let latest = saver.get(&thread)?.unwrap_or_else(Checkpoint::empty);
    println!("latest channel values: {:?}", latest.channel_values);
    println!("blob writes: {}", blob_sets.load(Ordering::Relaxed));
    Ok(())
}
