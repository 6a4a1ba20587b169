//! Saver configuration
//!
//! A [`SaverConfig`] can be built in code, read from a YAML or JSON file, or taken
//! from environment variables:
//!
//! ```yaml
//! persist_dir: /var/lib/agent/checkpoints
//! open_mode: create        # create | new | read_only
//! file_mode: 384           # 0o600
//! reserved_writes:
//!   __error__: -1
//!   __interrupt__: -3
//! ```
//!
//! | Variable                    | Example                      |
//! |-----------------------------|------------------------------|
//! | `<PREFIX>_PERSIST_DIR`      | `/var/lib/agent/checkpoints` |
//! | `<PREFIX>_OPEN_MODE`        | `read_only`                  |
//! | `<PREFIX>_FILE_MODE`        | `600` (octal)                |
//! | `<PREFIX>_RESERVED_WRITES`  | `__error__=-1,__interrupt__=-3` |

use crate::error::{CheckpointError, Result};
use crate::persistent::OpenMode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env::{self, VarError};
use std::path::{Path, PathBuf};

/// Trait for types that can be loaded from environment variables.
pub trait FromEnv: Sized {
    /// Load configuration from environment variables with the given prefix.
    fn from_env(prefix: &str) -> Result<Self>;
}

/// Trait for validating configuration.
pub trait ValidateConfig {
    /// Validate the configuration, returning an error if invalid.
    fn validate(&self) -> Result<()>;
}

/// Configuration for [`InMemoryCheckpointSaver`](crate::memory::InMemoryCheckpointSaver)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaverConfig {
    /// Keep the tables as files under this directory; in memory only when unset
    pub persist_dir: Option<PathBuf>,

    /// How existing table files are treated
    pub open_mode: OpenMode,

    /// Unix permission bits applied to table files after each sync
    pub file_mode: Option<u32>,

    /// Channel name to reserved (negative) write index
    pub reserved_writes: HashMap<String, i64>,
}

impl SaverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn with_open_mode(mut self, open_mode: OpenMode) -> Self {
        self.open_mode = open_mode;
        self
    }

    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = Some(file_mode);
        self
    }

    pub fn with_reserved_write(mut self, channel: impl Into<String>, index: i64) -> Self {
        self.reserved_writes.insert(channel.into(), index);
        self
    }

    /// Load configuration from a file, picking YAML or JSON by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                CheckpointError::Config(format!(
                    "Unable to determine file extension for {:?}",
                    path
                ))
            })?;

        let content = std::fs::read_to_string(path)?;
        match extension.to_lowercase().as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
                CheckpointError::Config(format!(
                    "Failed to parse YAML config from {:?}: {}",
                    path, e
                ))
            }),
            "json" => serde_json::from_str(&content).map_err(|e| {
                CheckpointError::Config(format!(
                    "Failed to parse JSON config from {:?}: {}",
                    path, e
                ))
            }),
            _ => Err(CheckpointError::Config(format!(
                "Unsupported config file extension: {}",
                extension
            ))),
        }
    }
}

impl FromEnv for SaverConfig {
    fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = get_env_opt(&format!("{}_PERSIST_DIR", prefix))? {
            config.persist_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = get_env_opt(&format!("{}_OPEN_MODE", prefix))? {
            config.open_mode = parse_open_mode(&mode)?;
        }
        if let Some(file_mode) = get_env_opt(&format!("{}_FILE_MODE", prefix))? {
            config.file_mode = Some(parse_octal(&file_mode)?);
        }
        if let Some(reserved) = get_env_opt(&format!("{}_RESERVED_WRITES", prefix))? {
            config.reserved_writes = parse_reserved_writes(&reserved)?;
        }

        Ok(config)
    }
}

impl ValidateConfig for SaverConfig {
    /// Reserved indices must be negative and distinct
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (channel, &index) in &self.reserved_writes {
            if index >= 0 {
                return Err(CheckpointError::Config(format!(
                    "Reserved write index for '{}' must be negative, got {}",
                    channel, index
                )));
            }
            if !seen.insert(index) {
                return Err(CheckpointError::Config(format!(
                    "Reserved write index {} is used by more than one channel",
                    index
                )));
            }
        }
        if self.open_mode == OpenMode::ReadOnly && self.persist_dir.is_none() {
            return Err(CheckpointError::Config(
                "open_mode read_only requires persist_dir".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get an environment variable, treating "not set" as `None`.
fn get_env_opt(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(CheckpointError::Config(format!(
            "Environment variable '{}' is invalid: {}",
            key, e
        ))),
    }
}

fn parse_open_mode(value: &str) -> Result<OpenMode> {
    match value.to_lowercase().as_str() {
        "create" | "c" => Ok(OpenMode::Create),
        "new" | "n" => Ok(OpenMode::New),
        "read_only" | "readonly" | "r" => Ok(OpenMode::ReadOnly),
        _ => Err(CheckpointError::Config(format!(
            "Invalid open mode: {}",
            value
        ))),
    }
}

fn parse_octal(value: &str) -> Result<u32> {
    let digits = value.trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .map_err(|e| CheckpointError::Config(format!("Invalid file mode '{}': {}", value, e)))
}

/// `chan=-1,chan2=-2`
fn parse_reserved_writes(value: &str) -> Result<HashMap<String, i64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> Result<(String, i64)> {
            let (channel, index) = pair.split_once('=').ok_or_else(|| {
                CheckpointError::Config(format!("Invalid reserved write entry: {}", pair))
            })?;
            let index = index.trim().parse::<i64>().map_err(|e| {
                CheckpointError::Config(format!(
                    "Invalid reserved write index for '{}': {}",
                    channel, e
                ))
            })?;
            Ok((channel.trim().to_string(), index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_in_memory() {
        let config = SaverConfig::default();
        assert!(config.persist_dir.is_none());
        assert_eq!(config.open_mode, OpenMode::Create);
        assert!(config.reserved_writes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saver.yaml");
        fs::write(
            &path,
            "persist_dir: /tmp/cp\nopen_mode: read_only\nreserved_writes:\n  __error__: -1\n",
        )
        .unwrap();

        let config = SaverConfig::from_file(&path).unwrap();
        assert_eq!(config.persist_dir, Some(PathBuf::from("/tmp/cp")));
        assert_eq!(config.open_mode, OpenMode::ReadOnly);
        assert_eq!(config.file_mode, None);
        assert_eq!(config.reserved_writes.get("__error__"), Some(&-1));
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saver.json");
        fs::write(&path, r#"{"file_mode": 384, "open_mode": "new"}"#).unwrap();

        let config = SaverConfig::from_file(&path).unwrap();
        assert_eq!(config.file_mode, Some(0o600));
        assert_eq!(config.open_mode, OpenMode::New);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saver.toml");
        fs::write(&path, "").unwrap();

        let err = SaverConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::Config(_)));
    }

    #[test]
    fn test_from_env() {
        let prefix = "CKPT_TEST_FROM_ENV";
        env::set_var(format!("{}_PERSIST_DIR", prefix), "/tmp/env-cp");
        env::set_var(format!("{}_OPEN_MODE", prefix), "new");
        env::set_var(format!("{}_FILE_MODE", prefix), "640");
        env::set_var(format!("{}_RESERVED_WRITES", prefix), "__error__=-1, __interrupt__=-3");

        let config = SaverConfig::from_env(prefix).unwrap();
        assert_eq!(config.persist_dir, Some(PathBuf::from("/tmp/env-cp")));
        assert_eq!(config.open_mode, OpenMode::New);
        assert_eq!(config.file_mode, Some(0o640));
        assert_eq!(config.reserved_writes.len(), 2);
        assert_eq!(config.reserved_writes.get("__interrupt__"), Some(&-3));
    }

    #[test]
    fn test_from_env_unset_uses_defaults() {
        let config = SaverConfig::from_env("CKPT_TEST_NOTHING_SET").unwrap();
        assert_eq!(config, SaverConfig::default());
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let prefix = "CKPT_TEST_BAD_ENV";
        env::set_var(format!("{}_FILE_MODE", prefix), "0o9");
        assert!(SaverConfig::from_env(prefix).is_err());

        let prefix = "CKPT_TEST_BAD_MODE";
        env::set_var(format!("{}_OPEN_MODE", prefix), "append");
        assert!(SaverConfig::from_env(prefix).is_err());
    }

    #[test]
    fn test_validate_reserved_indices() {
        assert!(SaverConfig::new()
            .with_reserved_write("__error__", 0)
            .validate()
            .is_err());
        assert!(SaverConfig::new()
            .with_reserved_write("__error__", -1)
            .with_reserved_write("__interrupt__", -1)
            .validate()
            .is_err());
        assert!(SaverConfig::new()
            .with_reserved_write("__error__", -1)
            .with_reserved_write("__interrupt__", -3)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_read_only_needs_dir() {
        let config = SaverConfig::new().with_open_mode(OpenMode::ReadOnly);
        assert!(config.validate().is_err());
        assert!(config.with_persist_dir("/tmp/cp").validate().is_ok());
    }
}
