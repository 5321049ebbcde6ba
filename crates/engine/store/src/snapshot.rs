//! Workspace snapshots
//!
//! Rendered on `workspace.save`. Collections are emitted in id order, so two
//! stores holding the same state produce byte-identical snapshots.

use crate::error::Result;
use chrono::{DateTime, Utc};
use engine_types::{
    ApprovalRecord, Deployment, DeploymentVersion, Environment, GithubEntity, JobAgent, Policy,
    PolicyBypass, PolicySkip, ReleaseTarget, Resource, System, Workflow, WorkflowTemplate,
    WorkspaceId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub workspace_id: WorkspaceId,
    pub taken_at: DateTime<Utc>,
    pub systems: Vec<System>,
    pub resources: Vec<Resource>,
    pub deployments: Vec<Deployment>,
    pub environments: Vec<Environment>,
    pub deployment_versions: Vec<DeploymentVersion>,
    pub policies: Vec<Policy>,
    pub policy_bypasses: Vec<PolicyBypass>,
    pub policy_skips: Vec<PolicySkip>,
    pub approvals: Vec<ApprovalRecord>,
    pub job_agents: Vec<JobAgent>,
    pub workflow_templates: Vec<WorkflowTemplate>,
    pub workflows: Vec<Workflow>,
    pub github_entities: Vec<GithubEntity>,
    pub release_targets: Vec<ReleaseTarget>,
}

impl WorkspaceSnapshot {
    /// SHA-256 over the state, excluding when the snapshot was taken
    pub fn digest(&self) -> Result<String> {
        let state = (
            (&self.systems, &self.resources, &self.deployments, &self.environments),
            (&self.deployment_versions, &self.policies, &self.policy_bypasses, &self.policy_skips),
            (&self.approvals, &self.job_agents, &self.workflow_templates, &self.workflows),
            (&self.github_entities, &self.release_targets),
        );
        let bytes = serde_json::to_vec(&state)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Destination for rendered snapshots
pub trait SnapshotSink: Send + Sync {
    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<()>;
}

/// Keeps every snapshot in memory
#[derive(Debug, Default)]
pub struct InMemorySnapshotSink {
    snapshots: Mutex<Vec<WorkspaceSnapshot>>,
}

impl InMemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, workspace_id: WorkspaceId) -> Option<WorkspaceSnapshot> {
        self.snapshots
            .lock()
            .iter()
            .rev()
            .find(|s| s.workspace_id == workspace_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl SnapshotSink for InMemorySnapshotSink {
    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<()> {
        tracing::debug!(
            workspace_id = %snapshot.workspace_id,
            resources = snapshot.resources.len(),
            release_targets = snapshot.release_targets.len(),
            "Snapshot saved"
        );
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}
