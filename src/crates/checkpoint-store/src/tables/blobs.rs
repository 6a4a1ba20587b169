//! Version-addressed channel values

use crate::backend::{MemoryBackend, StorageBackend};
use crate::checkpoint::{ChannelVersion, ChannelVersions};
use crate::error::Result;
use crate::serializer::{SerializerProtocol, TypedBlob};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Channel version as it appears inside a blob key
///
/// Externally tagged so that binary formats can decode it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VersionKey {
    Int(i64),
    Str(String),
}

impl From<&ChannelVersion> for VersionKey {
    fn from(version: &ChannelVersion) -> Self {
        match version {
            ChannelVersion::Int(v) => VersionKey::Int(*v),
            ChannelVersion::String(s) => VersionKey::Str(s.clone()),
        }
    }
}

/// `(thread_id, checkpoint_ns, channel, version)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobKey {
    pub thread_id: String,
    pub checkpoint_ns: String,
    pub channel: String,
    pub version: VersionKey,
}

impl BlobKey {
    pub fn new(thread_id: &str, checkpoint_ns: &str, channel: &str, version: &ChannelVersion) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            checkpoint_ns: checkpoint_ns.to_string(),
            channel: channel.to_string(),
            version: version.into(),
        }
    }
}

/// Serialized channel values, one per channel version
pub struct BlobTable {
    backend: Box<dyn StorageBackend<BlobKey, TypedBlob>>,
}

impl BlobTable {
    pub fn new(backend: Box<dyn StorageBackend<BlobKey, TypedBlob>>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Store a blob. Versions are immutable by contract; a rewrite replaces.
    pub fn store(&mut self, key: BlobKey, blob: TypedBlob) {
        self.backend.set(key, blob);
    }

    pub fn get(&self, key: &BlobKey) -> Option<&TypedBlob> {
        self.backend.get(key)
    }

    /// Decode the value of every channel in `versions`.
    ///
    /// Channels whose version holds the empty sentinel, or was never stored,
    /// are left out of the result.
    pub fn resolve(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        versions: &ChannelVersions,
        serde: &dyn SerializerProtocol,
    ) -> Result<HashMap<String, Value>> {
        let mut values = HashMap::with_capacity(versions.len());
        for (channel, version) in versions {
            let key = BlobKey::new(thread_id, checkpoint_ns, channel, version);
            match self.backend.get(&key) {
                Some(blob) if !blob.is_empty_sentinel() => {
                    values.insert(channel.clone(), serde.loads_typed(blob)?);
                }
                _ => {}
            }
        }
        Ok(values)
    }

    /// Remove every blob of `thread_id`, returning how many were removed
    pub fn delete_thread(&mut self, thread_id: &str) -> usize {
        let doomed: Vec<BlobKey> = self
            .backend
            .keys()
            .into_iter()
            .filter(|key| key.thread_id == thread_id)
            .collect();
        for key in &doomed {
            self.backend.delete(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
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
