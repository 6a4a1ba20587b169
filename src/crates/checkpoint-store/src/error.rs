//! Error types for checkpoint operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Invalid checkpoint address or argument
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// A channel version whose integer prefix cannot be parsed
    #[error("Invalid channel version '{0}': prefix is not an integer")]
    InvalidVersion(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted map file exists but is not in a recognized format
    #[error("Failed to load {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
