//! Error types for engine-core
//!
//! [`HandlerError`] classifies what went wrong while applying one event; the
//! partition worker decides from the class whether to skip the message,
//! dead-letter it, or halt the partition. [`EngineError`] covers everything
//! around the handlers: log and progress I/O, lifecycle, halted partitions.

use engine_release::ReleaseError;
use engine_store::StoreError;
use engine_types::TypesError;
use thiserror::Error;

/// Outcome class of a failed event application
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Malformed envelope or payload; the offset advances
    #[error("Decode error: {0}")]
    Decode(String),

    /// Well-formed but semantically invalid; rejected and dead-lettered
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal invariant violated; the partition halts
    #[error("State error: {0}")]
    State(String),
}

impl From<TypesError> for HandlerError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::UnknownEventKind(_) | TypesError::Decode(_) => {
                HandlerError::Decode(err.to_string())
            }
            TypesError::Selector(_) | TypesError::Validation(_) => {
                HandlerError::Validation(err.to_string())
            }
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        if err.is_validation() {
            HandlerError::Validation(err.to_string())
        } else {
            HandlerError::State(err.to_string())
        }
    }
}

impl From<ReleaseError> for HandlerError {
    fn from(err: ReleaseError) -> Self {
        if err.is_validation() {
            HandlerError::Validation(err.to_string())
        } else {
            HandlerError::State(err.to_string())
        }
    }
}

/// Errors raised by the engine runtime
#[derive(Debug, Error)]
pub enum EngineError {
    /// An event could not be applied
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Partition stopped on a state error
    #[error("Partition {topic}/{partition} halted at offset {offset}: {reason}")]
    PartitionHalted {
        topic: String,
        partition: u32,
        offset: i64,
        reason: String,
    },

    /// Partitioned log read or append failed
    #[error("Log error: {0}")]
    Log(String),

    /// Progress could not be loaded or persisted
    #[error("Progress error: {0}")]
    Progress(String),

    /// The registry was closed
    #[error("Registry closed")]
    Closed,

    /// Registry lifecycle misuse
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),

    /// A spawned worker panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    /// File I/O
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding of records or progress
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Envelope construction
    #[error("Event error: {0}")]
    Event(#[from] TypesError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::EntityKind;

    #[test]
    fn test_store_errors_are_classified() {
        let validation = HandlerError::from(StoreError::Validation("empty id".into()));
        assert!(matches!(validation, HandlerError::Validation(_)));

        let missing = HandlerError::from(StoreError::not_found(EntityKind::WorkflowTemplate, "t1"));
        assert!(matches!(missing, HandlerError::Validation(_)));

        let invariant = HandlerError::from(StoreError::Invariant("index asymmetric".into()));
        assert!(matches!(invariant, HandlerError::State(_)));
    }

    #[test]
    fn test_unknown_kind_is_decode_error() {
        let err = HandlerError::from(TypesError::UnknownEventKind("resource.exploded".into()));
        assert_eq!(err, HandlerError::Decode("Unknown event kind: resource.exploded".into()));
    }
}
