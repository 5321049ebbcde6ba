//! Jobs handed to job agents

use crate::ids::{JobAgentId, JobId, VersionId, WorkflowId};
use crate::release::ReleaseTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What a job deploys or runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobSubject {
    #[serde(rename_all = "camelCase")]
    Release {
        release_target: ReleaseTarget,
        version_id: VersionId,
        /// Counts redeploy commands for the target
        generation: u64,
    },
    #[serde(rename_all = "camelCase")]
    Workflow {
        workflow_id: WorkflowId,
        inputs: BTreeMap<String, serde_json::Value>,
    },
}

impl JobSubject {
    pub fn release_target(&self) -> Option<&ReleaseTarget> {
        match self {
            JobSubject::Release { release_target, .. } => Some(release_target),
            JobSubject::Workflow { .. } => None,
        }
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self, JobSubject::Workflow { .. })
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Pending or dispatched: counts against the one-in-flight limit
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Dispatched => "dispatched",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "dispatched" | "inProgress" | "in-progress" => Ok(JobStatus::Dispatched),
            "succeeded" | "successful" => Ok(JobStatus::Succeeded),
            "failed" | "failure" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A rendered unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub subject: JobSubject,
    pub job_agent_id: JobAgentId,
    /// Dispatcher type the agent resolved to
    pub agent_kind: String,
    /// Agent config merged with the deployment's or template's overrides
    #[serde(default)]
    pub job_agent_config: serde_json::Value,
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn release_target(&self) -> Option<&ReleaseTarget> {
        self.subject.release_target()
    }

    pub fn version_id(&self) -> Option<&VersionId> {
        match &self.subject {
            JobSubject::Release { version_id, .. } => Some(version_id),
            JobSubject::Workflow { .. } => None,
        }
    }

    pub fn transition(&mut self, status: JobStatus, message: Option<String>, at: DateTime<Utc>) {
        self.status = status;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = at;
    }
}
