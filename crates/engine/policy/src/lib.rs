//! Engine Policy - admission rules for release candidates
//!
//! Pure evaluation of policy rules over an [`EvaluationContext`]. Nothing in
//! this crate reads shared state or the clock; callers gather the context
//! first, then ask for a decision.
//!
//! ## Rule kinds
//!
//! - **environmentVersionRollout**: staggers a version across environments
//! - **timeWindow**: admits only inside recurring (RRULE) windows
//! - **anyApproval**: requires a minimum number of distinct approvers
//!
//! Bypasses admit outright; skips exempt individual rules.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod context;
pub mod decision;
pub mod error;
pub mod pipeline;
pub mod recurrence;
pub mod rules;

pub use context::EvaluationContext;
pub use decision::{EvaluationReport, PolicyDecision, RuleOutcome};
pub use error::{PolicyError, Result};
pub use pipeline::evaluate;
pub use recurrence::{Frequency, Recurrence, WindowState};
pub use rules::{evaluate_rule, rollout_admission_time, RuleEvaluator};
