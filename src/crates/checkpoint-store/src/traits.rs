//! Checkpoint saver contract
//!
//! [`CheckpointSaver`] is the synchronous contract every saver implements.
//! [`AsyncCheckpointSaver`] is the async facade: it is implemented for every
//! `CheckpointSaver` and forwards each `a*` method to its sync counterpart, so a
//! backend is written once and usable from both worlds.
//!
//! # Addressing
//!
//! | Operation     | `thread_id` | `checkpoint_ns`   | `checkpoint_id`          |
//! |---------------|-------------|-------------------|--------------------------|
//! | `get_tuple`   | required    | defaults to `""`  | absent = latest          |
//! | `list`        | optional    | optional filter   | optional exact filter    |
//! | `put`         | required    | defaults to `""`  | parent of the new one    |
//! | `put_writes`  | required    | defaults to `""`  | required                 |
//!
//! # Example
//!
//! ```rust,no_run
//! use checkpoint_store::{
//!     AsyncCheckpointSaver, Checkpoint, CheckpointConfig, CheckpointMetadata,
//!     CheckpointSaver, InMemoryCheckpointSaver,
//! };
//! use futures::StreamExt;
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn run() -> checkpoint_store::Result<()> {
//! let saver = InMemoryCheckpointSaver::new();
//! let version = saver.get_next_version(None)?;
//!
//! let checkpoint = Checkpoint::empty().with_channel("messages", json!(["hi"]), version.clone());
//! let mut new_versions = HashMap::new();
//! new_versions.insert("messages".to_string(), version);
//!
//! let root = CheckpointConfig::new().with_thread_id("thread-1");
//! let saved = saver
//!     .aput(&root, checkpoint, CheckpointMetadata::new().with_step(0), new_versions)
//!     .await?;
//!
//! let mut history = saver.alist(Some(&root), None, None, None).await?;
//! while let Some(tuple) = history.next().await {
//!     println!("{:?}", tuple?.config.checkpoint_id);
//! }
//! # let _ = saved;
//! # Ok(())
//! # }
//! ```

use crate::{
    checkpoint::{
        ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata,
        CheckpointTuple,
    },
    error::Result,
    version::next_version,
};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// Lazy sequence of checkpoint tuples returned by [`CheckpointSaver::list`]
pub type CheckpointIter = Box<dyn Iterator<Item = Result<CheckpointTuple>> + Send + 'static>;

/// Type alias for async stream of checkpoint tuples
pub type CheckpointStream =
    Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Core trait for checkpoint storage backends
///
/// Every operation is individually atomic with respect to the others. Absence is
/// reported as `Ok(None)` or an empty listing, never as an error.
pub trait CheckpointSaver: Send + Sync {
    /// Fetch only the checkpoint addressed by `config`
    fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config)?.map(|tuple| tuple.checkpoint))
    }

    /// Retrieve a checkpoint with its metadata, parent and pending writes.
    ///
    /// With a `checkpoint_id` that exact checkpoint is loaded and `config` is
    /// returned as given; without one, the latest checkpoint of the namespace is
    /// loaded and the returned config is its full address.
    ///
    /// Channel values are resolved from `channel_versions`. Channels whose version
    /// holds no value are left out of `channel_values`.
    fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints, newest first within each namespace.
    ///
    /// * `config` - restricts to its `thread_id`, `checkpoint_ns` and `checkpoint_id`
    ///   where present; `None` lists every thread
    /// * `filter` - metadata entries that must all be equal
    /// * `before` - only IDs strictly lower than its `checkpoint_id`
    /// * `limit` - stop after this many items; `Some(0)` yields nothing
    ///
    /// The listing is lazy: a checkpoint deleted before it is reached is skipped.
    fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointIter>;

    /// Store a checkpoint as the child of `config.checkpoint_id`.
    ///
    /// Only channels named in `new_versions` have their values written; a channel
    /// listed there but missing from `checkpoint.channel_values` is recorded as
    /// having no value at that version. Returns the address of the stored checkpoint.
    fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig>;

    /// Stage task writes against the checkpoint addressed by `config`.
    ///
    /// A write is identified by `(task_id, index)`. Ordinal indices keep the first
    /// write; reserved (negative) indices always overwrite.
    fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()>;

    /// Delete every checkpoint, blob and pending write of `thread_id`
    fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Version to assign to a channel whose current version is `current`
    fn get_next_version(&self, current: Option<&ChannelVersion>) -> Result<ChannelVersion> {
        next_version(current)
    }
}

impl<T: CheckpointSaver + ?Sized> CheckpointSaver for Arc<T> {
    fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        (**self).get(config)
    }

    fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        (**self).get_tuple(config)
    }

    fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointIter> {
        (**self).list(config, filter, before, limit)
    }

    fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig> {
        (**self).put(config, checkpoint, metadata, new_versions)
    }

    fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()> {
        (**self).put_writes(config, writes, task_id, task_path)
    }

    fn delete_thread(&self, thread_id: &str) -> Result<()> {
        (**self).delete_thread(thread_id)
    }

    fn get_next_version(&self, current: Option<&ChannelVersion>) -> Result<ChannelVersion> {
        (**self).get_next_version(current)
    }
}

/// Async facade over [`CheckpointSaver`]
///
/// Implemented for every `CheckpointSaver`; each method runs the sync operation
/// inline and never yields.
#[async_trait]
pub trait AsyncCheckpointSaver: Send + Sync {
    async fn aget(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>>;

    async fn aget_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    async fn alist(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    async fn aput(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig>;

    async fn aput_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()>;

    async fn adelete_thread(&self, thread_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: CheckpointSaver + ?Sized> AsyncCheckpointSaver for T {
    async fn aget(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        self.get(config)
    }

    async fn aget_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        self.get_tuple(config)
    }

    async fn alist(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let items = self.list(config, filter, before, limit)?;
        Ok(Box::pin(stream::iter(items)))
    }

    async fn aput(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig> {
        self.put(config, checkpoint, metadata, new_versions)
    }

    async fn aput_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
        task_path: &str,
    ) -> Result<()> {
        self.put_writes(config, writes, task_id, task_path)
    }

    async fn adelete_thread(&self, thread_id: &str) -> Result<()> {
        self.delete_thread(thread_id)
    }
}
