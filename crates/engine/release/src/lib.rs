//! Engine Release - reconciling release targets
//!
//! For every release target the manager picks the newest admissible
//! version, runs it through the policy pipeline and hands an admitted job to
//! the dispatch gateway, keeping at most one job in flight per target.
//!
//! ## Key Concepts
//!
//! - **ReleaseManager**: per-target state machine and job table
//! - **Selection**: newest-first candidate walk with policy evaluation
//! - **Reconciler**: the per-workspace loop driving the manager

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod candidate;
pub mod error;
pub mod manager;
pub mod reconciler;
pub mod state;

pub use candidate::{evaluation_context, rollout_position, select_candidate, Selection};
pub use error::{ReleaseError, Result};
pub use manager::{
    ReconcileOutcome, ReconcileSummary, ReleaseManager, TargetChanges, DEFAULT_EARLY_RESULT_LIMIT,
};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use state::{Phase, TargetState, Wait};
