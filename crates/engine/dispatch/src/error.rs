//! Dispatch error types

use thiserror::Error;

/// Errors that can occur while handing a job to an agent
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Agent temporarily unavailable; retry with backoff
    #[error("Transient dispatch failure: {0}")]
    Transient(String),

    /// Agent rejected the job; retrying will not help
    #[error("Permanent dispatch failure: {0}")]
    Permanent(String),

    /// No registered dispatcher can take the job
    #[error("No job agent available: {0}")]
    NoAgent(String),

    /// Dispatcher exists but does not support this kind of job
    #[error("Agent {kind} does not support {capability} jobs")]
    Unsupported {
        /// Dispatcher type
        kind: String,
        /// Missing capability, `workflows` or `deployments`
        capability: &'static str,
    },

    /// Job record could not be persisted
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Shutdown fired before dispatch completed
    #[error("Dispatch cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Whether retrying the same job may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient(_) | DispatchError::Ledger(_))
    }
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
