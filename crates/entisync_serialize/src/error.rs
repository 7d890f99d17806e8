//! Error types for serialization.

use entisync_core::CoreError;
use thiserror::Error;

/// Result type for serialization.
pub type SerializeResult<T> = Result<T, SerializeError>;

/// Errors that can occur while serializing an entity graph.
#[derive(Error, Debug)]
pub enum SerializeError {
    /// The id-key callback rejected an entity type.
    #[error("id key for {entity_type}: {message}")]
    IdKey {
        /// Entity type being serialized.
        entity_type: String,
        /// Callback message.
        message: String,
    },

    /// A removal path is empty or has an empty segment.
    #[error("invalid field path: {path:?}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },

    /// JSON export failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR export failed.
    #[error("cbor error: {0}")]
    Cbor(String),

    /// Graph access failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl SerializeError {
    /// Creates an id-key error.
    pub fn id_key(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IdKey {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for SerializeError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::Cbor(err.to_string())
    }
}
