//! Error types for the entisync core.

use crate::value::Value;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type returned by provider methods.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur in core operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Hydration flags did not select exactly one mode.
    #[error("invalid hydration flags: {bits:#07b}")]
    InvalidHydrationFlags {
        /// The offending bits.
        bits: u8,
    },

    /// A mapped key was absent from the input record.
    #[error("required key not present in record: {key}")]
    UnmappedKey {
        /// Input key.
        key: String,
    },

    /// A key map cannot be inverted because an output key repeats.
    #[error("ambiguous key mapping: {key} is produced more than once")]
    AmbiguousMapping {
        /// Repeated output key.
        key: String,
    },

    /// A handle does not belong to this graph.
    #[error("unknown handle: {handle}")]
    UnknownHandle {
        /// Raw handle index.
        handle: usize,
    },

    /// A placeholder was dereferenced before it was resolved.
    #[error("{entity_type} {id} has not been resolved")]
    Unresolved {
        /// Entity type of the placeholder.
        entity_type: String,
        /// Backend id of the placeholder.
        id: Value,
    },

    /// No backend record exists for an id.
    #[error("{entity_type} not found: {id}")]
    EntityNotFound {
        /// Entity type searched.
        entity_type: String,
        /// Backend id that was not found.
        id: Value,
    },

    /// No metadata is registered for an entity type.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Entity type name.
        name: String,
    },

    /// No provider is registered under a name.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// Provider name.
        name: String,
    },

    /// The entity type declares no relationship with this name.
    #[error("{entity_type} has no relationship named {name}")]
    UnknownRelationship {
        /// Entity type searched.
        entity_type: String,
        /// Relationship name.
        name: String,
    },

    /// Filter arguments do not match a recognized shape.
    #[error("invalid filter signature: {message}")]
    InvalidFilterSignature {
        /// Description of the mismatch.
        message: String,
    },
}

impl CoreError {
    /// Creates an entity not found error.
    pub fn entity_not_found(entity_type: impl Into<String>, id: impl Into<Value>) -> Self {
        Self::EntityNotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an invalid filter signature error.
    pub fn invalid_filter_signature(message: impl Into<String>) -> Self {
        Self::InvalidFilterSignature {
            message: message.into(),
        }
    }
}

/// Errors raised by provider methods.
///
/// The engine propagates these unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The backend could not be reached.
    #[error("backend unreachable: {message}")]
    BackendUnreachable {
        /// Error message.
        message: String,
    },

    /// The backend rejected the request.
    #[error("backend error: {message}")]
    Backend {
        /// Error message.
        message: String,
    },

    /// A record returned or accepted by the provider is malformed.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// A core error raised inside a provider method.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProviderError {
    /// Creates a backend unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            message: message.into(),
        }
    }

    /// Creates a generic backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }
}
