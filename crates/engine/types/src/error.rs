//! Error types for engine-types

use crate::selector::SelectorError;
use thiserror::Error;

/// Errors raised while decoding or validating workspace types
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for type-level operations
pub type Result<T> = std::result::Result<T, TypesError>;
