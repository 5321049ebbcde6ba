//! Release manager error types

use engine_dispatch::DispatchError;
use engine_store::StoreError;
use engine_types::ReleaseTarget;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Entity store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Dispatch error that could not be handled locally
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Release target is not in the derived set
    #[error("Unknown release target: {0}")]
    UnknownTarget(ReleaseTarget),
}

impl ReleaseError {
    /// Caused by the request rather than by engine state
    pub fn is_validation(&self) -> bool {
        match self {
            ReleaseError::UnknownTarget(_) => true,
            ReleaseError::Store(e) => e.is_validation(),
            ReleaseError::Dispatch(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReleaseError>;
