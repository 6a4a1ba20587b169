//! The three tables behind [`InMemoryCheckpointSaver`](crate::memory::InMemoryCheckpointSaver)
//!
//! - [`CheckpointTable`] - `thread_id -> checkpoint_ns -> checkpoint_id -> StoredCheckpoint`
//! - [`BlobTable`] - `(thread_id, checkpoint_ns, channel, version) -> TypedBlob`
//! - [`WriteBuffer`] - `(thread_id, checkpoint_ns, checkpoint_id) -> [StoredWrite]`
//!
//! None of the tables lock; the saver wraps each one in its own `RwLock`.

pub mod blobs;
pub mod checkpoints;
pub mod writes;

pub use blobs::{BlobKey, BlobTable, VersionKey};
pub use checkpoints::{CheckpointTable, NamespaceCheckpoints, StoredCheckpoint};
pub use writes::{StoredWrite, WriteBuffer};

use crate::checkpoint::CheckpointId;
use serde::{Deserialize, Serialize};

/// Fully-qualified checkpoint key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub thread_id: String,
    pub checkpoint_ns: String,
    pub checkpoint_id: CheckpointId,
}

impl CheckpointKey {
    pub fn new(
        thread_id: impl Into<String>,
        checkpoint_ns: impl Into<String>,
        checkpoint_id: impl Into<CheckpointId>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: checkpoint_ns.into(),
            checkpoint_id: checkpoint_id.into(),
        }
    }
}
