//! Error types for the sync engine.

use entisync_core::{CoreError, ProviderError, SyncOperation, Value};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while dispatching or building entities.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No provider method resolves for the requested operation.
    #[error("provider {provider} does not implement {operation} for {entity_type}")]
    OperationNotImplemented {
        /// Provider name.
        provider: String,
        /// Entity type name.
        entity_type: String,
        /// Requested operation.
        operation: SyncOperation,
    },

    /// A read by id or a placeholder resolution found no record.
    #[error("{entity_type} not found: {id}")]
    EntityNotFound {
        /// Entity type name.
        entity_type: String,
        /// Backend id.
        id: Value,
    },

    /// Filter keys were supplied that the provider did not claim.
    #[error("provider {provider} did not claim filter keys for {entity_type}: {}", .keys.join(", "))]
    FilterPolicyViolation {
        /// Provider name.
        provider: String,
        /// Entity type name.
        entity_type: String,
        /// Unclaimed keys, in supplied order.
        keys: Vec<String>,
    },

    /// Operation arguments match no recognized filter shape.
    #[error("invalid filter signature: {0}")]
    InvalidFilterSignature(String),

    /// Error raised by a provider method, passed through unchanged.
    #[error(transparent)]
    Provider(ProviderError),

    /// No metadata is registered for an entity type.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// No provider is registered, or bound, under a name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Any other core error.
    #[error("core error: {0}")]
    Core(CoreError),
}

impl EngineError {
    /// Creates an entity-not-found error.
    pub fn entity_not_found(entity_type: impl Into<String>, id: impl Into<Value>) -> Self {
        Self::EntityNotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Creates an operation-not-implemented error.
    pub fn not_implemented(
        provider: impl Into<String>,
        entity_type: impl Into<String>,
        operation: SyncOperation,
    ) -> Self {
        Self::OperationNotImplemented {
            provider: provider.into(),
            entity_type: entity_type.into(),
            operation,
        }
    }

    /// Returns true for errors meaning "no such entity".
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::EntityNotFound { .. })
    }

    /// Returns true if the error came from a provider's backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, EngineError::Provider(_))
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::EntityNotFound { entity_type, id } => Self::EntityNotFound { entity_type, id },
            CoreError::InvalidFilterSignature { message } => Self::InvalidFilterSignature(message),
            CoreError::UnknownEntityType { name } => Self::UnknownEntityType(name),
            CoreError::UnknownProvider { name } => Self::UnknownProvider(name),
            other => Self::Core(other),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Core(core) => core.into(),
            other => Self::Provider(other),
        }
    }
}
