//! Error types for engine-store

use engine_types::{EntityKind, SelectorError, TypesError};
use thiserror::Error;

/// Errors raised by entity store mutations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity is well-formed but semantically invalid
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Invalid selector on an incoming entity
    #[error("Invalid selector: {0}")]
    Selector(#[from] SelectorError),

    /// Derived state disagrees with the collections
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Snapshot or change payload serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Validation-class errors reject the mutation; everything else is a
    /// state error.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::Validation(_) | StoreError::Selector(_) | StoreError::NotFound { .. }
        )
    }
}

impl From<TypesError> for StoreError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::Selector(e) => StoreError::Selector(e),
            TypesError::Decode(e) => StoreError::Serialization(e),
            other => StoreError::Validation(other.to_string()),
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
