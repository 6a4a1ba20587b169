//! Serialization protocol for checkpoint data
//!
//! The store never looks inside a channel value. Every value passes through a
//! [`SerializerProtocol`] which turns it into a [`TypedBlob`] (a type tag plus raw
//! bytes) and back. The only tag the store itself understands is
//! [`EMPTY_TYPE_TAG`], which marks a channel that had no value at a given version.

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved type tag for "channel had no value at this version"
pub const EMPTY_TYPE_TAG: &str = "empty";

/// Serialized value tagged with the codec that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedBlob {
    pub type_tag: String,
    pub payload: Vec<u8>,
}

impl TypedBlob {
    /// Create a new typed blob
    pub fn new(type_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
        }
    }

    /// The empty sentinel
    pub fn empty() -> Self {
        Self::new(EMPTY_TYPE_TAG, Vec::new())
    }

    /// Whether this blob is the empty sentinel
    pub fn is_empty_sentinel(&self) -> bool {
        self.type_tag == EMPTY_TYPE_TAG
    }
}

/// Protocol for serializing and deserializing checkpoint data
///
/// Implementations can provide custom serialization strategies
/// (JSON, MessagePack, compressed formats, etc.). Tags other than
/// [`EMPTY_TYPE_TAG`] are owned by the implementation.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value into a tagged blob
    fn dumps_typed(&self, value: &Value) -> Result<TypedBlob>;

    /// Deserialize a tagged blob produced by [`dumps_typed`](Self::dumps_typed)
    fn loads_typed(&self, blob: &TypedBlob) -> Result<Value>;
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    const JSON_TAG: &'static str = "json";
    const NULL_TAG: &'static str = "null";

    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps_typed(&self, value: &Value) -> Result<TypedBlob> {
        if value.is_null() {
            return Ok(TypedBlob::new(Self::NULL_TAG, Vec::new()));
        }
        Ok(TypedBlob::new(Self::JSON_TAG, serde_json::to_vec(value)?))
    }

    fn loads_typed(&self, blob: &TypedBlob) -> Result<Value> {
        match blob.type_tag.as_str() {
            Self::NULL_TAG => Ok(Value::Null),
            Self::JSON_TAG => Ok(serde_json::from_slice(&blob.payload)?),
            other => Err(CheckpointError::Invalid(format!(
                "unsupported type tag '{}' for JSON serializer",
                other
            ))),
        }
    }
}
