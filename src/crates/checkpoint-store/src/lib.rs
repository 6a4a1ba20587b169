//! # checkpoint-store - Versioned checkpoints for stateful graph runs
//!
//! A thread-scoped, namespace-scoped store of state snapshots with lineage,
//! deduplicated channel values and staged task writes.
//!
//! ## Core Concepts
//!
//! - **Thread** - one execution history, addressed by `thread_id`
//! - **Namespace** - a sub-graph inside a thread (`""` is the root graph)
//! - **Checkpoint** - a snapshot; its ID sorts by creation time, so the latest
//!   checkpoint of a namespace is the one with the greatest ID
//! - **Channel version** - each channel value is stored once per version and
//!   shared by every checkpoint that still references that version
//! - **Pending write** - output of a task, staged against the checkpoint it ran
//!   from, deduplicated by `(task_id, index)`
//!
//! ## Quick Start
//!
//! ```rust
//! use checkpoint_store::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
//!     InMemoryCheckpointSaver,
//! };
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # fn main() -> checkpoint_store::Result<()> {
//! let saver = InMemoryCheckpointSaver::new();
//! let thread = CheckpointConfig::new().with_thread_id("thread-123");
//!
//! let v1 = saver.get_next_version(None)?;
//! let checkpoint = Checkpoint::empty().with_channel("messages", json!(["hello"]), v1.clone());
//! let metadata = CheckpointMetadata::new()
//!     .with_source(CheckpointSource::Input)
//!     .with_step(-1);
//!
//! let mut new_versions = HashMap::new();
//! new_versions.insert("messages".to_string(), v1);
//! let saved = saver.put(&thread, checkpoint, metadata, new_versions)?;
//!
//! saver.put_writes(&saved, vec![("messages".to_string(), json!("world"))], "task-1", "")?;
//!
//! let tuple = saver.get_tuple(&thread)?.expect("checkpoint");
//! assert_eq!(tuple.checkpoint.channel_values["messages"], json!(["hello"]));
//! assert_eq!(tuple.pending_writes.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`checkpoint`] - value types (`Checkpoint`, `CheckpointConfig`, ...)
//! - [`traits`] - the [`CheckpointSaver`] contract and its async facade
//! - [`memory`] - [`InMemoryCheckpointSaver`], optionally file-backed
//! - [`tables`] - the checkpoint, blob and write tables behind the saver
//! - [`backend`] / [`persistent`] - storage the tables are written against
//! - [`serializer`] - value codecs
//! - [`config`] - [`SaverConfig`] from code, files or the environment

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod memory;
pub mod persistent;
pub mod serializer;
pub mod tables;
pub mod traits;
pub mod version;

// Re-export main types
pub use backend::{MemoryBackend, StorageBackend};
pub use checkpoint::{
    ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointId,
    CheckpointMetadata, CheckpointSource, CheckpointTuple, PendingWrite,
};
pub use config::{FromEnv, SaverConfig, ValidateConfig};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use persistent::{OpenMode, PersistentMap};
pub use serializer::{JsonSerializer, SerializerProtocol, TypedBlob, EMPTY_TYPE_TAG};
pub use traits::{AsyncCheckpointSaver, CheckpointIter, CheckpointSaver, CheckpointStream};
pub use version::next_version;
