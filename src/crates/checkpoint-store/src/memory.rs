//! In-memory checkpoint saver
//!
//! [`InMemoryCheckpointSaver`] owns three tables, each behind its own `RwLock`:
//!
//! ```text
//! checkpoints: thread_id -> checkpoint_ns -> checkpoint_id -> (core, metadata, parent)
//! blobs:       (thread_id, checkpoint_ns, channel, version) -> TypedBlob | "empty"
//! writes:      (thread_id, checkpoint_ns, checkpoint_id) -> [(task_id, index, channel, blob, task_path)]
//! ```
//!
//! Channel values are stored once per version. A checkpoint keeps only
//! `channel_versions` and values are re-assembled from the blob table on read, so
//! a channel that did not change between two checkpoints is never encoded twice.
//!
//! Whenever more than one table is locked, the order is checkpoints, blobs, writes.
//! `put` only locks checkpoints and blobs. On `sync` the checkpoint table is
//! written last, after the blobs and writes it points at.
//!
//! # Durability
//!
//! By default the tables live in memory only. [`InMemoryCheckpointSaver::persistent`]
//! (or a [`SaverConfig`] with `persist_dir`) backs each table with a
//! [`PersistentMap`] file. Those files are written on [`sync`](InMemoryCheckpointSaver::sync),
//! on [`close`](InMemoryCheckpointSaver::close), or when the last clone of the saver
//! is dropped.
//!
//! ```rust,no_run
//! use checkpoint_store::{CheckpointSaver, InMemoryCheckpointSaver, OpenMode};
//!
//! # fn main() -> checkpoint_store::Result<()> {
//! let saver = InMemoryCheckpointSaver::persistent("/var/lib/agent/checkpoints", OpenMode::Create, Some(0o600))?;
//! // ... put / put_writes ...
//! saver.close()?;
//! # Ok(())
//! # }
//! ```

use crate::{
    backend::StorageBackend,
    checkpoint::{
        ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    },
    config::{SaverConfig, ValidateConfig},
    error::Result,
    persistent::{OpenMode, PersistentMap},
    serializer::{JsonSerializer, SerializerProtocol, TypedBlob},
    tables::{
        BlobKey, BlobTable, CheckpointKey, CheckpointTable, NamespaceCheckpoints,
        StoredCheckpoint, StoredWrite, WriteBuffer,
    },
    traits::{CheckpointIter, CheckpointSaver},
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File holding the checkpoint table under a persistence directory
pub const CHECKPOINTS_FILE: &str = "checkpoints.bin";
/// File holding the blob table under a persistence directory
pub const BLOBS_FILE: &str = "blobs.bin";
/// File holding the pending-write table under a persistence directory
pub const WRITES_FILE: &str = "writes.bin";

/// In-memory checkpoint saver implementation
///
/// Cloning is cheap and every clone shares the same tables.
///
/// # Example
///
/// ```rust
/// use checkpoint_store::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, InMemoryCheckpointSaver};
/// use std::collections::HashMap;
///
/// # fn main() -> checkpoint_store::Result<()> {
/// let saver = InMemoryCheckpointSaver::new();
/// let config = CheckpointConfig::new().with_thread_id("thread-1");
///
/// let saved = saver.put(&config, Checkpoint::empty(), CheckpointMetadata::new(), HashMap::new())?;
/// let tuple = saver.get_tuple(&config)?.expect("latest checkpoint");
/// assert_eq!(tuple.config, saved);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryCheckpointSaver {
    checkpoints: Arc<RwLock<CheckpointTable>>,
    blobs: Arc<RwLock<BlobTable>>,
    writes: Arc<RwLock<WriteBuffer>>,
    serde: Arc<dyn SerializerProtocol>,
    reserved_writes: Arc<HashMap<String, i64>>,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self::from_tables(
            CheckpointTable::in_memory(),
            BlobTable::in_memory(),
            WriteBuffer::in_memory(),
        )
    }

    /// Build a saver over caller-supplied storage backends
    pub fn with_backends(
        checkpoints: Box<dyn StorageBackend<String, NamespaceCheckpoints>>,
        blobs: Box<dyn StorageBackend<BlobKey, TypedBlob>>,
        writes: Box<dyn StorageBackend<CheckpointKey, Vec<StoredWrite>>>,
    ) -> Self {
        Self::from_tables(
            CheckpointTable::new(checkpoints),
            BlobTable::new(blobs),
            WriteBuffer::new(writes),
        )
    }

    /// Open a saver whose tables are persisted as files under `dir`.
    ///
    /// `dir` is created unless `mode` is [`OpenMode::ReadOnly`].
    pub fn persistent(
        dir: impl AsRef<Path>,
        mode: OpenMode,
        file_mode: Option<u32>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        if mode != OpenMode::ReadOnly {
            fs::create_dir_all(dir)?;
        }

        let checkpoints = open_map(dir.join(CHECKPOINTS_FILE), mode, file_mode)?;
        let blobs = open_map(dir.join(BLOBS_FILE), mode, file_mode)?;
        let writes = open_map(dir.join(WRITES_FILE), mode, file_mode)?;

        info!(dir = %dir.display(), ?mode, "Opened persistent checkpoint store");
        Ok(Self::with_backends(
            Box::new(checkpoints),
            Box::new(blobs),
            Box::new(writes),
        ))
    }

    /// Build a saver from a validated [`SaverConfig`]
    pub fn from_config(config: &SaverConfig) -> Result<Self> {
        config.validate()?;
        let saver = match &config.persist_dir {
            Some(dir) => Self::persistent(dir, config.open_mode, config.file_mode)?,
            None => Self::new(),
        };
        Ok(saver.with_reserved_writes(config.reserved_writes.clone()))
    }

    fn from_tables(checkpoints: CheckpointTable, blobs: BlobTable, writes: WriteBuffer) -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(checkpoints)),
            blobs: Arc::new(RwLock::new(blobs)),
            writes: Arc::new(RwLock::new(writes)),
            serde: Arc::new(JsonSerializer::new()),
            reserved_writes: Arc::new(HashMap::new()),
        }
    }

    /// Replace the value codec
    pub fn with_serializer(mut self, serde: impl SerializerProtocol + 'static) -> Self {
        self.serde = Arc::new(serde);
        self
    }

    /// Map of channel name to the reserved (negative) write index it is staged under
    pub fn with_reserved_writes(mut self, reserved_writes: HashMap<String, i64>) -> Self {
        self.reserved_writes = Arc::new(reserved_writes);
        self
    }

    /// Get the number of threads with checkpoints
    pub fn thread_count(&self) -> usize {
        self.checkpoints.read().thread_count()
    }

    /// Get the total number of checkpoints across all threads
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().checkpoint_count()
    }

    /// Number of stored channel versions, empty sentinels included
    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    /// Clear all checkpoints, blobs and pending writes
    pub fn clear(&self) {
        let mut checkpoints = self.checkpoints.write();
        let mut blobs = self.blobs.write();
        let mut writes = self.writes.write();
        checkpoints.clear();
        blobs.clear();
        writes.clear();
    }

    /// Flush every table to its backend
    pub fn sync(&self) -> Result<()> {
        let mut checkpoints = self.checkpoints.write();
        let mut blobs = self.blobs.write();
        let mut writes = self.writes.write();
        blobs.sync()?;
        writes.sync()?;
        checkpoints.sync()?;
        info!("Synced checkpoint store");
        Ok(())
    }

    /// Final sync of every table. Later syncs and drops do nothing.
    pub fn close(&self) -> Result<()> {
        let mut checkpoints = self.checkpoints.write();
        let mut blobs = self.blobs.write();
        let mut writes = self.writes.write();
        blobs.close()?;
        writes.close()?;
        checkpoints.close()?;
        info!("Closed checkpoint store");
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, blob: &TypedBlob) -> Result<T> {
        Ok(serde_json::from_value(self.serde.loads_typed(blob)?)?)
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<TypedBlob> {
        self.serde.dumps_typed(&serde_json::to_value(value)?)
    }

    /// Assemble the tuple for `key`, handing back `config` as its address
    fn materialize(
        &self,
        blobs: &BlobTable,
        writes: &WriteBuffer,
        key: &CheckpointKey,
        stored: &StoredCheckpoint,
        metadata: CheckpointMetadata,
        config: CheckpointConfig,
    ) -> Result<CheckpointTuple> {
        let mut checkpoint: Checkpoint = self.decode(&stored.checkpoint)?;
        checkpoint.channel_values = blobs.resolve(
            &key.thread_id,
            &key.checkpoint_ns,
            &checkpoint.channel_versions,
            self.serde.as_ref(),
        )?;
        let pending_writes = writes.pending(key, self.serde.as_ref())?;

        let mut tuple =
            CheckpointTuple::new(config, checkpoint, metadata).with_pending_writes(pending_writes);
        if let Some(parent_id) = &stored.parent_checkpoint_id {
            tuple = tuple.with_parent_config(CheckpointConfig::address(
                &key.thread_id,
                &key.checkpoint_ns,
                parent_id,
            ));
        }
        Ok(tuple)
    }

    /// Load one listing candidate; `None` when it is gone or filtered out
    fn load_listed(
        &self,
        key: &CheckpointKey,
        filter: &HashMap<String, Value>,
    ) -> Result<Option<CheckpointTuple>> {
        let checkpoints = self.checkpoints.read();
        let blobs = self.blobs.read();
        let writes = self.writes.read();

        let Some(stored) = checkpoints.get(key) else {
            return Ok(None);
        };
        let metadata: CheckpointMetadata = self.decode(&stored.metadata)?;
        if !metadata.matches(filter)? {
            return Ok(None);
        }

        let config = CheckpointConfig::address(
            &key.thread_id,
            &key.checkpoint_ns,
            &key.checkpoint_id,
        );
        self.materialize(&blobs, &writes, key, stored, metadata, config)
            .map(Some)
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryCheckpointSaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCheckpointSaver")
            .field("reserved_writes", &self.reserved_writes)
            .finish_non_exhaustive()
    }
}

fn open_map<K, V>(path: PathBuf, mode: OpenMode, file_mode: Option<u32>) -> Result<PersistentMap<K, V>>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    let map = PersistentMap::open_with(path, mode)?;
    Ok(match file_mode {
        Some(file_mode) => map.with_file_mode(file_mode),
        None => map,
    })
}

/// Lazy listing over a snapshot of candidate keys
struct ListIter {
    saver: InMemoryCheckpointSaver,
    keys: std::vec::IntoIter<CheckpointKey>,
    filter: HashMap<String, Value>,
    remaining: Option<usize>,
}

impl Iterator for ListIter {
    type Item = Result<CheckpointTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        for key in self.keys.by_ref() {
            match self.saver.load_listed(&key, &self.filter) {
                Ok(None) => continue,
                Ok(Some(tuple)) => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    return Some(Ok(tuple));
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

impl CheckpointSaver for InMemoryCheckpointSaver {
    fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config.require_thread_id()?;
        let checkpoint_ns = config.namespace();

        let checkpoints = self.checkpoints.read();
        let blobs = self.blobs.read();
        let writes = self.writes.read();

        let (key, stored, address) = match &config.checkpoint_id {
            Some(checkpoint_id) => {
                let key = CheckpointKey::new(thread_id, checkpoint_ns, checkpoint_id.clone());
                let Some(stored) = checkpoints.get(&key) else {
                    return Ok(None);
                };
                (key, stored, config.clone())
            }
            None => {
                let Some((key, stored)) = checkpoints.latest(thread_id, checkpoint_ns) else {
                    return Ok(None);
                };
                let address = CheckpointConfig::address(
                    &key.thread_id,
                    &key.checkpoint_ns,
                    &key.checkpoint_id,
                );
                (key, stored, address)
            }
        };

        let metadata: CheckpointMetadata = self.decode(&stored.metadata)?;
        self.materialize(&blobs, &writes, &key, stored, metadata, address)
            .map(Some)
    }

    fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointIter> {
        let keys = self.checkpoints.read().candidates(
            config.and_then(|c| c.thread_id.as_deref()),
            config.and_then(|c| c.checkpoint_ns.as_deref()),
            config.and_then(|c| c.checkpoint_id.as_deref()),
            before.and_then(|c| c.checkpoint_id.as_deref()),
        );

        Ok(Box::new(ListIter {
            saver: self.clone(),
            keys: keys.into_iter(),
            filter: filter.unwrap_or_default(),
            remaining: limit,
        }))
    }

    fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.require_thread_id()?;
        let checkpoint_ns = config.namespace();

        let mut core = checkpoint;
        let values = std::mem::take(&mut core.channel_values);

        let mut new_blobs = Vec::with_capacity(new_versions.len());
        for (channel, version) in &new_versions {
            let blob = match values.get(channel) {
                Some(value) => self.serde.dumps_typed(value)?,
                None => TypedBlob::empty(),
            };
            new_blobs.push((BlobKey::new(thread_id, checkpoint_ns, channel, version), blob));
        }

        let metadata = metadata.merged_with_config(config);
        let stored_checkpoint = self.encode(&core)?;
        let stored_metadata = self.encode(&metadata)?;
        let key = CheckpointKey::new(thread_id, checkpoint_ns, core.id);

        let blob_total = new_blobs.len();
        let mut checkpoints = self.checkpoints.write();
        let mut blobs = self.blobs.write();

        // Re-putting a checkpoint under its own ID keeps the lineage it already had
        let parent_checkpoint_id = match config.checkpoint_id.as_deref() {
            Some(parent_id) if parent_id == key.checkpoint_id => checkpoints
                .get(&key)
                .and_then(|existing| existing.parent_checkpoint_id.clone()),
            other => other.map(str::to_string),
        };

        for (blob_key, blob) in new_blobs {
            blobs.store(blob_key, blob);
        }
        checkpoints.insert(
            &key,
            StoredCheckpoint {
                checkpoint: stored_checkpoint,
                metadata: stored_metadata,
                parent_checkpoint_id: parent_checkpoint_id.clone(),
            },
        );
        drop(blobs);
        drop(checkpoints);

        debug!(
            thread_id = %key.thread_id,
            checkpoint_ns = %key.checkpoint_ns,
            checkpoint_id = %key.checkpoint_id,
            parent = ?parent_checkpoint_id,
            blobs = blob_total,
            "Stored checkpoint"
        );

        Ok(CheckpointConfig::address(
            key.thread_id,
            key.checkpoint_ns,
            key.checkpoint_id,
        ))
    }

    fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()> {
        let thread_id = config.require_thread_id()?;
        let checkpoint_id = config.require_checkpoint_id()?;
        let key = CheckpointKey::new(thread_id, config.namespace(), checkpoint_id);

        let mut staged = Vec::with_capacity(writes.len());
        for (ordinal, (channel, value)) in writes.into_iter().enumerate() {
            let index = match self.reserved_writes.get(&channel) {
                Some(&reserved) => reserved,
                None => ordinal as i64,
            };
            staged.push(StoredWrite {
                task_id: task_id.to_string(),
                index,
                value: self.serde.dumps_typed(&value)?,
                channel,
                task_path: task_path.to_string(),
            });
        }

        let total = staged.len();
        let mut dropped = 0usize;
        {
            let mut buffer = self.writes.write();
            for write in staged {
                if !buffer.stage(&key, write) {
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            debug!(
                thread_id = %key.thread_id,
                checkpoint_id = %key.checkpoint_id,
                task_id = %task_id,
                dropped,
                "Ignored duplicate writes"
            );
        }
        debug!(
            thread_id = %key.thread_id,
            checkpoint_ns = %key.checkpoint_ns,
            checkpoint_id = %key.checkpoint_id,
            task_id = %task_id,
            writes = total - dropped,
            "Staged pending writes"
        );
        Ok(())
    }

    fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut checkpoints = self.checkpoints.write();
        let mut blobs = self.blobs.write();
        let mut writes = self.writes.write();

        let removed_checkpoints = checkpoints.delete_thread(thread_id);
        let removed_blobs = blobs.delete_thread(thread_id);
        let removed_writes = writes.delete_thread(thread_id);

        debug!(
            thread_id = %thread_id,
            checkpoints = removed_checkpoints,
            blobs = removed_blobs,
            writes = removed_writes,
            "Deleted thread"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::checkpoint::{ChannelVersion, CheckpointSource};
    use crate::error::CheckpointError;
    use serde_json::json;
    use tempfile::TempDir;

    fn root(thread_id: &str) -> CheckpointConfig {
        CheckpointConfig::new().with_thread_id(thread_id)
    }

    fn versions(pairs: &[(&str, i64)]) -> ChannelVersions {
        pairs
            .iter()
            .map(|(c, v)| (c.to_string(), ChannelVersion::Int(*v)))
            .collect()
    }

    fn checkpoint(id: &str) -> Checkpoint {
        Checkpoint::new(id.to_string(), HashMap::new(), HashMap::new(), HashMap::new())
    }

    #[test]
    fn test_save_and_load_checkpoint() {
        let saver = InMemoryCheckpointSaver::new();
        let cp = checkpoint("1").with_channel("messages", json!(["hello"]), 1);
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1);

        let saved = saver
            .put(&root("thread-1"), cp.clone(), metadata.clone(), versions(&[("messages", 1)]))
            .unwrap();
        assert_eq!(saved, CheckpointConfig::address("thread-1", "", "1"));

        let tuple = saver.get_tuple(&root("thread-1")).unwrap().unwrap();
        assert_eq!(tuple.config, saved);
        assert_eq!(tuple.checkpoint, cp);
        assert_eq!(tuple.metadata, metadata);
        assert!(tuple.parent_config.is_none());
        assert!(tuple.pending_writes.is_empty());
    }

    #[test]
    fn test_get_missing_is_none() {
        let saver = InMemoryCheckpointSaver::new();
        assert!(saver.get_tuple(&root("nobody")).unwrap().is_none());
        assert!(saver
            .get(&root("nobody").with_checkpoint_id("1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_thread_id_is_invalid() {
        let saver = InMemoryCheckpointSaver::new();
        let err = saver.get_tuple(&CheckpointConfig::new()).unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));

        let err = saver
            .put(&CheckpointConfig::new(), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[test]
    fn test_explicit_id_returns_caller_config() {
        let saver = InMemoryCheckpointSaver::new();
        saver
            .put(&root("t"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();

        let asked = root("t")
            .with_checkpoint_id("1")
            .with_extra("run_id", json!("r"));
        let tuple = saver.get_tuple(&asked).unwrap().unwrap();
        assert_eq!(tuple.config, asked);
    }

    #[test]
    fn test_parent_is_config_checkpoint_id() {
        let saver = InMemoryCheckpointSaver::new();
        let first = saver
            .put(&root("t"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();
        let second = saver
            .put(&first, checkpoint("2"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();

        let tuple = saver.get_tuple(&second).unwrap().unwrap();
        assert_eq!(tuple.parent_config, Some(first));
    }

    #[test]
    fn test_reput_under_own_id_keeps_parent() {
        let saver = InMemoryCheckpointSaver::new();
        let first = saver
            .put(&root("t"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();
        let second = saver
            .put(&first, checkpoint("2"), CheckpointMetadata::new().with_step(1), HashMap::new())
            .unwrap();
        saver
            .put(&second, checkpoint("2"), CheckpointMetadata::new().with_step(2), HashMap::new())
            .unwrap();

        let tuple = saver.get_tuple(&second).unwrap().unwrap();
        assert_eq!(tuple.metadata.step, Some(2));
        assert_eq!(tuple.parent_config, Some(first));
        assert_eq!(saver.checkpoint_count(), 2);
    }

    #[test]
    fn test_unchanged_channels_resolve_from_earlier_versions() {
        let saver = InMemoryCheckpointSaver::new();
        let c1 = checkpoint("1")
            .with_channel("x", json!(1), 1)
            .with_channel("y", json!("a"), 1);
        let saved = saver
            .put(&root("t"), c1, CheckpointMetadata::new(), versions(&[("x", 1), ("y", 1)]))
            .unwrap();

        let c2 = checkpoint("2")
            .with_channel("x", json!(1), 1)
            .with_channel("y", json!("b"), 2);
        saver
            .put(&saved, c2, CheckpointMetadata::new(), versions(&[("y", 2)]))
            .unwrap();

        assert_eq!(saver.blob_count(), 3);
        let latest = saver.get(&root("t")).unwrap().unwrap();
        assert_eq!(latest.channel_values["x"], json!(1));
        assert_eq!(latest.channel_values["y"], json!("b"));
    }

    #[test]
    fn test_channel_without_value_is_omitted() {
        let saver = InMemoryCheckpointSaver::new();
        let mut cp = checkpoint("1").with_channel("x", json!(1), 1);
        cp.channel_versions.insert("cleared".to_string(), ChannelVersion::Int(4));

        saver
            .put(&root("t"), cp, CheckpointMetadata::new(), versions(&[("x", 1), ("cleared", 4)]))
            .unwrap();

        let loaded = saver.get(&root("t")).unwrap().unwrap();
        assert_eq!(loaded.channel_values.len(), 1);
        assert_eq!(loaded.channel_versions.len(), 2);
        assert_eq!(saver.blob_count(), 2);
    }

    #[test]
    fn test_metadata_merges_config_scalars() {
        let saver = InMemoryCheckpointSaver::new();
        let config = root("t").with_extra("run_id", json!("run-1"));
        saver
            .put(&config, checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();

        let tuple = saver.get_tuple(&root("t")).unwrap().unwrap();
        assert_eq!(tuple.metadata.extra.get("run_id"), Some(&json!("run-1")));
    }

    #[test]
    fn test_put_writes() {
        let saver = InMemoryCheckpointSaver::new();
        let saved = saver
            .put(&root("t"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();

        saver
            .put_writes(&saved, vec![("channel1".to_string(), json!("value1"))], "task-1", "")
            .unwrap();
        saver
            .put_writes(&saved, vec![("channel1".to_string(), json!("value2"))], "task-1", "")
            .unwrap();

        let tuple = saver.get_tuple(&saved).unwrap().unwrap();
        assert_eq!(
            tuple.pending_writes,
            vec![("task-1".to_string(), "channel1".to_string(), json!("value1"))]
        );
    }

    #[test]
    fn test_put_writes_requires_checkpoint_id() {
        let saver = InMemoryCheckpointSaver::new();
        let err = saver
            .put_writes(&root("t"), vec![("c".to_string(), json!(1))], "task", "")
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[test]
    fn test_reserved_writes_overwrite() {
        let mut reserved = HashMap::new();
        reserved.insert("__error__".to_string(), -1);
        let saver = InMemoryCheckpointSaver::new().with_reserved_writes(reserved);
        let at = root("t").with_checkpoint_id("1");

        saver
            .put_writes(&at, vec![("__error__".to_string(), json!("boom"))], "task", "")
            .unwrap();
        saver
            .put_writes(&at, vec![("__error__".to_string(), json!("again"))], "task", "")
            .unwrap();

        let writes = saver.writes.read();
        let staged = writes.get(&CheckpointKey::new("t", "", "1"));
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].index, -1);
        assert_eq!(saver.serde.loads_typed(&staged[0].value).unwrap(), json!("again"));
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let saver = InMemoryCheckpointSaver::new();
        let mut config = root("t");
        for id in ["1", "2", "3"] {
            config = saver
                .put(&config, checkpoint(id), CheckpointMetadata::new(), HashMap::new())
                .unwrap();
        }

        let ids: Vec<_> = saver
            .list(Some(&root("t")), None, None, Some(2))
            .unwrap()
            .map(|t| t.unwrap().checkpoint.id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);

        assert_eq!(saver.list(None, None, None, Some(0)).unwrap().count(), 0);
    }

    #[test]
    fn test_list_skips_checkpoints_deleted_mid_iteration() {
        let saver = InMemoryCheckpointSaver::new();
        saver
            .put(&root("a"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();
        saver
            .put(&root("b"), checkpoint("2"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();

        let mut listing = saver.list(None, None, None, None).unwrap();
        let first = listing.next().unwrap().unwrap();
        assert_eq!(first.config.thread_id.as_deref(), Some("a"));

        saver.delete_thread("b").unwrap();
        assert!(listing.next().is_none());
    }

    #[test]
    fn test_delete_thread() {
        let saver = InMemoryCheckpointSaver::new();
        let saved = saver
            .put(
                &root("thread-1"),
                checkpoint("1").with_channel("x", json!(1), 1),
                CheckpointMetadata::new(),
                versions(&[("x", 1)]),
            )
            .unwrap();
        saver
            .put_writes(&saved, vec![("x".to_string(), json!(2))], "task", "")
            .unwrap();
        saver
            .put(&root("thread-2"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
            .unwrap();

        saver.delete_thread("thread-1").unwrap();
        assert!(saver.get_tuple(&root("thread-1")).unwrap().is_none());
        assert!(saver.get_tuple(&root("thread-2")).unwrap().is_some());
        assert_eq!(saver.blob_count(), 0);
        assert_eq!(saver.writes.read().scope_count(), 0);

        // unknown thread is a no-op
        saver.delete_thread("thread-9").unwrap();
        assert_eq!(saver.thread_count(), 1);
    }

    #[test]
    fn test_clear() {
        let saver = InMemoryCheckpointSaver::new();
        for thread in ["a", "b"] {
            saver
                .put(&root(thread), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
                .unwrap();
        }
        assert_eq!(saver.thread_count(), 2);

        saver.clear();
        assert_eq!(saver.thread_count(), 0);
        assert_eq!(saver.checkpoint_count(), 0);
    }

    #[test]
    fn test_persistent_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let saver = InMemoryCheckpointSaver::persistent(dir.path(), OpenMode::Create, None).unwrap();
            let saved = saver
                .put(
                    &root("t"),
                    checkpoint("1").with_channel("x", json!({"n": 1}), 1),
                    CheckpointMetadata::new().with_step(0),
                    versions(&[("x", 1)]),
                )
                .unwrap();
            saver
                .put_writes(&saved, vec![("x".to_string(), json!(2))], "task", "path")
                .unwrap();
            saver.close().unwrap();
        }
        assert!(dir.path().join(CHECKPOINTS_FILE).exists());

        let reopened = InMemoryCheckpointSaver::persistent(dir.path(), OpenMode::Create, None).unwrap();
        let tuple = reopened.get_tuple(&root("t")).unwrap().unwrap();
        assert_eq!(tuple.checkpoint.channel_values["x"], json!({"n": 1}));
        assert_eq!(tuple.metadata.step, Some(0));
        assert_eq!(tuple.pending_writes.len(), 1);
    }

    /// Memory backend that logs its name on every sync
    struct SyncRecorder<K, V> {
        inner: MemoryBackend<K, V>,
        name: &'static str,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl<K: Ord, V> SyncRecorder<K, V> {
        fn boxed(name: &'static str, log: &Arc<parking_lot::Mutex<Vec<&'static str>>>) -> Box<Self> {
            Box::new(Self {
                inner: MemoryBackend::new(),
                name,
                log: log.clone(),
            })
        }
    }

    impl<K, V> StorageBackend<K, V> for SyncRecorder<K, V>
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

        fn sync(&mut self) -> Result<()> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    #[test]
    fn test_checkpoint_table_is_synced_last() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let checkpoints: Box<SyncRecorder<String, NamespaceCheckpoints>> =
            SyncRecorder::boxed("checkpoints", &log);
        let blobs: Box<SyncRecorder<BlobKey, TypedBlob>> = SyncRecorder::boxed("blobs", &log);
        let writes: Box<SyncRecorder<CheckpointKey, Vec<StoredWrite>>> =
            SyncRecorder::boxed("writes", &log);
        let saver = InMemoryCheckpointSaver::with_backends(checkpoints, blobs, writes);

        saver.sync().unwrap();
        assert_eq!(*log.lock(), vec!["blobs", "writes", "checkpoints"]);

        log.lock().clear();
        saver.close().unwrap();
        assert_eq!(*log.lock(), vec!["blobs", "writes", "checkpoints"]);
    }

    #[test]
    fn test_drop_of_last_clone_syncs() {
        let dir = TempDir::new().unwrap();
        {
            let saver = InMemoryCheckpointSaver::persistent(dir.path(), OpenMode::Create, None).unwrap();
            let clone = saver.clone();
            drop(saver);
            clone
                .put(&root("t"), checkpoint("1"), CheckpointMetadata::new(), HashMap::new())
                .unwrap();
        }

        let reopened = InMemoryCheckpointSaver::persistent(dir.path(), OpenMode::Create, None).unwrap();
        assert_eq!(reopened.checkpoint_count(), 1);
    }
}
