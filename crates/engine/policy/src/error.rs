//! Error types for policy evaluation
//!
//! These never leave the pipeline: a rule that fails to evaluate becomes a
//! `Denied` decision carrying the error text.

use thiserror::Error;

/// Policy evaluation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Recurrence expression could not be parsed
    #[error("Invalid recurrence rule: {reason}")]
    InvalidRecurrence { reason: String },

    /// Context lacks data the rule needs
    #[error("Missing evaluation data: {what}")]
    MissingData { what: String },

    /// Rule evaluation failed
    #[error("Policy evaluation failed: {reason}")]
    EvaluationFailed { reason: String },
}

impl PolicyError {
    pub(crate) fn recurrence(reason: impl Into<String>) -> Self {
        Self::InvalidRecurrence {
            reason: reason.into(),
        }
    }
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
