//! Inbound events
//!
//! Every message on the log is a [`RawEvent`] envelope. The event type is a
//! closed enumeration so an unrecognised string is rejected at decode time
//! instead of silently falling through a handler table.

use crate::ids::{JobId, WorkspaceId};
use crate::job::JobStatus;
use crate::TypesError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! event_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Recognised event kinds
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum EventKind {
            $($variant),+
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $name),+
                }
            }
        }

        impl FromStr for EventKind {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(EventKind::$variant),)+
                    other => Err(TypesError::UnknownEventKind(other.to_string())),
                }
            }
        }
    };
}

event_kinds! {
    ResourceCreated => "resource.created",
    ResourceUpdated => "resource.updated",
    ResourceDeleted => "resource.deleted",
    DeploymentCreated => "deployment.created",
    DeploymentUpdated => "deployment.updated",
    DeploymentDeleted => "deployment.deleted",
    EnvironmentCreated => "environment.created",
    EnvironmentUpdated => "environment.updated",
    EnvironmentDeleted => "environment.deleted",
    SystemCreated => "system.created",
    SystemUpdated => "system.updated",
    SystemDeleted => "system.deleted",
    DeploymentVersionCreated => "deployment-version.created",
    PolicyCreated => "policy.created",
    PolicyUpdated => "policy.updated",
    PolicyDeleted => "policy.deleted",
    PolicyBypassCreated => "policy-bypass.created",
    PolicyBypassDeleted => "policy-bypass.deleted",
    PolicySkipCreated => "policy-skip.created",
    PolicySkipDeleted => "policy-skip.deleted",
    JobAgentCreated => "job-agent.created",
    JobAgentUpdated => "job-agent.updated",
    JobAgentDeleted => "job-agent.deleted",
    WorkflowTemplateCreated => "workflow-template.created",
    WorkflowCreated => "workflow.created",
    GithubEntityCreated => "github-entity.created",
    GithubEntityDeleted => "github-entity.deleted",
    ApprovalCreated => "approval.created",
    JobUpdated => "job.updated",
    ReleaseTargetRedeploy => "release-target.redeploy",
    WorkspaceSave => "workspace.save",
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope as read from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_type: String,
    pub workspace_id: WorkspaceId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawEvent {
    pub fn new(
        kind: EventKind,
        workspace_id: WorkspaceId,
        timestamp: DateTime<Utc>,
        data: impl Serialize,
    ) -> Result<Self, TypesError> {
        Ok(Self {
            event_type: kind.as_str().to_string(),
            workspace_id,
            timestamp,
            data: serde_json::to_value(data)?,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn kind(&self) -> Result<EventKind, TypesError> {
        self.event_type.parse()
    }

    /// Decode the kind-specific payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TypesError> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// Payload of `job.updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
}
