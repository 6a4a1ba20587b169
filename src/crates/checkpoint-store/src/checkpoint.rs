//! Core checkpoint data structures
//!
//! This module defines the value types that flow through the store:
//!
//! - [`Checkpoint`] - State snapshot with channel values and versions
//! - [`CheckpointConfig`] - Resumable address `(thread_id, checkpoint_ns, checkpoint_id)`
//! - [`CheckpointMetadata`] - Step, source, parents and custom data
//! - [`CheckpointTuple`] - What `get_tuple` and `list` hand back
//! - [`ChannelVersion`] / [`ChannelVersions`] - Per-channel version tags
//! - [`PendingWrite`] - A staged task write as seen by readers
//!
//! # Addressing
//!
//! ```text
//! thread_id ──┬── checkpoint_ns ""        ── checkpoint_id (sorted, max = latest)
//!             └── checkpoint_ns "child:1" ── checkpoint_id ...
//! ```
//!
//! An absent `checkpoint_id` means "latest" on read and "no parent" on write.
//!
//! # Channel values
//!
//! `Checkpoint::channel_values` is populated on the way in (`put`) and on the way
//! out (`get_tuple`). At rest the values live in the blob table keyed by
//! `(thread_id, checkpoint_ns, channel, version)`; the stored core state carries
//! only `channel_versions`.

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Pending write tuple: (task_id, channel, value)
pub type PendingWrite = (String, String, Value);

/// Channel version tag - an integer or a generated string
///
/// Generated versions look like `00000000000000000000000000000003.4821930475520913`:
/// a zero-padded integer prefix that orders versions, then a random tie-break.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum ChannelVersion {
    Int(i64),
    String(String),
}

impl ChannelVersion {
    /// Integer prefix of the version (the part before the first `.`)
    pub fn integer_prefix(&self) -> Result<i64> {
        match self {
            ChannelVersion::Int(v) => Ok(*v),
            ChannelVersion::String(s) => {
                let prefix = s.split('.').next().unwrap_or_default();
                prefix
                    .parse::<i64>()
                    .map_err(|_| CheckpointError::InvalidVersion(s.clone()))
            }
        }
    }
}

impl fmt::Display for ChannelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelVersion::Int(v) => write!(f, "{}", v),
            ChannelVersion::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ChannelVersion {
    fn from(v: i64) -> Self {
        ChannelVersion::Int(v)
    }
}

impl From<String> for ChannelVersion {
    fn from(v: String) -> Self {
        ChannelVersion::String(v)
    }
}

impl From<&str> for ChannelVersion {
    fn from(v: &str) -> Self {
        ChannelVersion::String(v.to_string())
    }
}

/// Mapping from channel name to version
pub type ChannelVersions = HashMap<String, ChannelVersion>;

/// Metadata source type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Checkpoint created from an input to invoke/stream/batch
    Input,
    /// Checkpoint created from inside the pregel loop
    Loop,
    /// Checkpoint created from a manual state update
    Update,
    /// Checkpoint created as a copy of another checkpoint
    Fork,
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// The step number of the checkpoint
    /// -1 for the first "input" checkpoint
    /// 0 for the first "loop" checkpoint
    /// n for the nth checkpoint afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i32>,

    /// The IDs of the parent checkpoints
    /// Mapping from checkpoint namespace to checkpoint ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<HashMap<String, String>>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    /// Keys of a config that never leak into metadata
    const EXCLUDED_CONFIG_KEYS: [&'static str; 6] = [
        "thread_id",
        "checkpoint_id",
        "checkpoint_ns",
        "source",
        "step",
        "parents",
    ];

    /// Create a new checkpoint metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the step number
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = Some(step);
        self
    }

    /// Set parent checkpoints
    pub fn with_parents(mut self, parents: HashMap<String, String>) -> Self {
        self.parents = Some(parents);
        self
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Fold the ambient identifiers of `config` into this metadata.
    ///
    /// Entries of an explicit `metadata` object in the config are taken as-is;
    /// other config entries are taken when they are scalars. Keys starting with
    /// `__`, address keys, and keys already present are left alone.
    pub fn merged_with_config(mut self, config: &CheckpointConfig) -> Self {
        if let Some(Value::Object(explicit)) = config.extra.get("metadata") {
            for (key, value) in explicit {
                self.insert_ambient(key, value.clone());
            }
        }

        for (key, value) in &config.extra {
            if key == "metadata" {
                continue;
            }
            let scalar = matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_));
            if scalar {
                self.insert_ambient(key, value.clone());
            }
        }

        self
    }

    fn insert_ambient(&mut self, key: &str, value: Value) {
        if key.starts_with("__") || Self::EXCLUDED_CONFIG_KEYS.contains(&key) {
            return;
        }
        self.extra.entry(key.to_string()).or_insert(value);
    }

    /// Whether every `filter` entry equals the corresponding metadata field
    ///
    /// An absent field compares equal to `null`.
    pub fn matches(&self, filter: &HashMap<String, Value>) -> Result<bool> {
        if filter.is_empty() {
            return Ok(true);
        }
        let encoded = serde_json::to_value(self)?;
        Ok(filter
            .iter()
            .all(|(key, expected)| encoded.get(key).unwrap_or(&Value::Null) == expected))
    }
}

/// State snapshot at a given point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// The version of the checkpoint format (currently 1)
    pub v: i32,

    /// The ID of the checkpoint (unique and lexicographically increasing)
    pub id: CheckpointId,

    /// The timestamp of the checkpoint
    pub ts: DateTime<Utc>,

    /// The values of the channels at the time of the checkpoint
    /// Mapping from channel name to channel snapshot value
    #[serde(default)]
    pub channel_values: HashMap<String, Value>,

    /// The versions of the channels at the time of the checkpoint
    pub channel_versions: ChannelVersions,

    /// Map from node ID to map from channel name to version seen
    pub versions_seen: HashMap<String, ChannelVersions>,

    /// The channels that were updated in this checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_channels: Option<Vec<String>>,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    /// Create a new checkpoint
    pub fn new(
        id: CheckpointId,
        channel_values: HashMap<String, Value>,
        channel_versions: ChannelVersions,
        versions_seen: HashMap<String, ChannelVersions>,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id,
            ts: Utc::now(),
            channel_values,
            channel_versions,
            versions_seen,
            updated_channels: None,
        }
    }

    /// Create an empty checkpoint with a fresh time-ordered ID
    pub fn empty() -> Self {
        Self::new(
            Self::generate_id(),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        )
    }

    /// Generate a checkpoint ID that sorts after every ID generated before it
    pub fn generate_id() -> CheckpointId {
        Uuid::now_v7().to_string()
    }

    /// Set a channel value together with its version
    pub fn with_channel(
        mut self,
        channel: impl Into<String>,
        value: Value,
        version: impl Into<ChannelVersion>,
    ) -> Self {
        let channel = channel.into();
        self.channel_versions.insert(channel.clone(), version.into());
        self.channel_values.insert(channel, value);
        self
    }

    /// Set the updated channels
    pub fn with_updated_channels(mut self, channels: Vec<String>) -> Self {
        self.updated_channels = Some(channels);
        self
    }
}

/// Configuration for checkpoint operations
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointConfig {
    /// Thread ID for grouping related checkpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Specific checkpoint ID to retrieve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    /// Checkpoint namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,

    /// Additional configuration
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointConfig {
    /// Create a new checkpoint configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Fully-qualified address of one checkpoint
    pub fn address(
        thread_id: impl Into<String>,
        checkpoint_ns: impl Into<String>,
        checkpoint_id: impl Into<CheckpointId>,
    ) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_ns: Some(checkpoint_ns.into()),
            checkpoint_id: Some(checkpoint_id.into()),
            extra: HashMap::new(),
        }
    }

    /// Set the thread ID
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Set the checkpoint ID
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Set the checkpoint namespace
    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }

    /// Add an extra configuration entry
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Thread ID, or an error if the config has none
    pub fn require_thread_id(&self) -> Result<&str> {
        self.thread_id
            .as_deref()
            .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
    }

    /// Checkpoint ID, or an error if the config has none
    pub fn require_checkpoint_id(&self) -> Result<&str> {
        self.checkpoint_id
            .as_deref()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))
    }

    /// Namespace, defaulting to the root graph
    pub fn namespace(&self) -> &str {
        self.checkpoint_ns.as_deref().unwrap_or("")
    }
}

/// A tuple containing a checkpoint and its associated data
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Configuration for this checkpoint
    pub config: CheckpointConfig,

    /// The checkpoint itself, with channel values resolved
    pub checkpoint: Checkpoint,

    /// Metadata associated with the checkpoint
    pub metadata: CheckpointMetadata,

    /// Parent configuration (if any)
    pub parent_config: Option<CheckpointConfig>,

    /// Writes staged against this checkpoint
    pub pending_writes: Vec<PendingWrite>,
}

impl CheckpointTuple {
    /// Create a new checkpoint tuple
    pub fn new(
        config: CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
            pending_writes: Vec::new(),
        }
    }

    /// Set the parent configuration
    pub fn with_parent_config(mut self, parent_config: CheckpointConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }

    /// Set the pending writes
    pub fn with_pending_writes(mut self, pending_writes: Vec<PendingWrite>) -> Self {
        self.pending_writes = pending_writes;
        self
    }
}
