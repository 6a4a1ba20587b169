//! File-backed map with deferred, atomic durability
//!
//! [`PersistentMap`] keeps every entry in memory, so reads and writes cost the same
//! as a plain `BTreeMap`. Nothing touches the disk until [`PersistentMap::sync`],
//! [`PersistentMap::close`], or drop. A sync writes the whole map to `<path>.tmp`
//! and renames it over `<path>`, so the destination always holds either the
//! previous snapshot or the new one.
//!
//! ```rust,no_run
//! use checkpoint_store::{PersistentMap, StorageBackend};
//!
//! # fn main() -> checkpoint_store::Result<()> {
//! let mut map: PersistentMap<String, u64> = PersistentMap::open("/tmp/counters.bin")?;
//! map.set("runs".to_string(), 1);
//! map.close()?; // sync + clear; drop would have synced too
//! # Ok(())
//! # }
//! ```
//!
//! The on-disk format is a single bincode-encoded `BTreeMap<K, V>`. A missing or
//! zero-length file loads as an empty map; anything else that fails to decode is
//! a [`CheckpointError::Load`].

use crate::backend::StorageBackend;
use crate::error::{CheckpointError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// How an existing file is treated when the map is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Load the file if it exists, create it on first sync
    #[default]
    Create,
    /// Ignore any existing file; the first sync replaces it
    New,
    /// Load the file; sync never writes
    ReadOnly,
}

/// In-memory map committed to a single file on sync
pub struct PersistentMap<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    path: PathBuf,
    mode: OpenMode,
    file_mode: Option<u32>,
    entries: BTreeMap<K, V>,
    closed: bool,
}

impl<K, V> PersistentMap<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Open `path` in [`OpenMode::Create`]
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(path, OpenMode::Create)
    }

    /// Open `path` with an explicit mode
    pub fn open_with(path: impl Into<PathBuf>, mode: OpenMode) -> Result<Self> {
        let mut map = Self {
            path: path.into(),
            mode,
            file_mode: None,
            entries: BTreeMap::new(),
            closed: false,
        };
        if mode != OpenMode::New {
            map.load()?;
        }
        Ok(map)
    }

    /// Apply unix permission bits (e.g. `0o600`) to the file after every commit
    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = Some(file_mode);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn load(&mut self) -> Result<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(());
        }

        let loaded: BTreeMap<K, V> =
            bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
                error!(path = ?self.path, error = %e, "Failed to load persistent map");
                CheckpointError::Load {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
            })?;

        info!(path = ?self.path, entries = loaded.len(), "Loaded persistent map");
        self.entries.extend(loaded);
        Ok(())
    }

    /// Write the whole map to disk, atomically replacing the previous file.
    /// No-op once the map is closed.
    pub fn sync(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.commit()
    }

    fn commit(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }

        let temp_path = self.temp_path();
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let written = bincode::serialize_into(&mut writer, &self.entries)
            .map_err(CheckpointError::from)
            .and_then(|()| writer.flush().map_err(CheckpointError::from));
        drop(writer);

        let committed = written
            .and_then(|()| fs::rename(&temp_path, &self.path).map_err(CheckpointError::from));
        if let Err(e) = committed {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                error!(path = ?temp_path, error = %cleanup, "Failed to remove temp file");
            }
            return Err(e);
        }
        self.apply_file_mode()?;

        debug!(path = ?self.path, entries = self.entries.len(), "Synced persistent map");
        Ok(())
    }

    #[cfg(unix)]
    fn apply_file_mode(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(file_mode) = self.file_mode {
            fs::set_permissions(&self.path, fs::Permissions::from_mode(file_mode))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_file_mode(&self) -> Result<()> {
        Ok(())
    }

    /// Sync, then drop all in-memory entries. Later drops do not sync again.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.commit();
        self.entries.clear();
        result
    }
}

impl<K, V> StorageBackend<K, V> for PersistentMap<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
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

    fn sync(&mut self) -> Result<()> {
        PersistentMap::sync(self)
    }

    fn close(&mut self) -> Result<()> {
        PersistentMap::close(self)
    }
}

impl<K, V> Drop for PersistentMap<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.commit() {
            error!(path = ?self.path, error = %e, "Failed to sync persistent map on drop");
        }
    }
}
