//! Evaluation context
//!
//! Everything a rule may look at, gathered up front by the caller so that
//! evaluation itself touches no shared state.

use chrono::{DateTime, Utc};
use engine_types::{DeploymentVersion, PolicyBypass, PolicySkip, ReleaseTarget};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub release_target: ReleaseTarget,
    pub version: DeploymentVersion,
    pub now: DateTime<Utc>,
    /// Position of the target's environment in the rollout order
    pub rollout_position: Option<u32>,
    /// Distinct approvers of `version` for the target's environment
    pub approvers: BTreeSet<String>,
    pub bypasses: Vec<PolicyBypass>,
    pub skips: Vec<PolicySkip>,
}

impl EvaluationContext {
    pub fn new(release_target: ReleaseTarget, version: DeploymentVersion, now: DateTime<Utc>) -> Self {
        Self {
            release_target,
            version,
            now,
            rollout_position: None,
            approvers: BTreeSet::new(),
            bypasses: Vec::new(),
            skips: Vec::new(),
        }
    }

    pub fn with_rollout_position(mut self, position: u32) -> Self {
        self.rollout_position = Some(position);
        self
    }

    pub fn with_approvers(mut self, approvers: BTreeSet<String>) -> Self {
        self.approvers = approvers;
        self
    }

    pub fn with_bypasses(mut self, bypasses: Vec<PolicyBypass>) -> Self {
        self.bypasses = bypasses;
        self
    }

    pub fn with_skips(mut self, skips: Vec<PolicySkip>) -> Self {
        self.skips = skips;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
