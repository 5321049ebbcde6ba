//! Workspace entities
//!
//! These are the records carried by inbound events and held in the entity
//! store. Field names serialize in camelCase to match the event payloads.

use crate::ids::{
    ApprovalId, DeploymentId, EnvironmentId, JobAgentId, ResourceId, SystemId, VersionId,
    WorkflowId, WorkflowTemplateId, WorkspaceId,
};
use crate::selector::{Selectable, Selector};
use crate::TypesError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of entity held by a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Resource,
    Deployment,
    Environment,
    System,
    DeploymentVersion,
    Policy,
    PolicyBypass,
    PolicySkip,
    Approval,
    JobAgent,
    WorkflowTemplate,
    Workflow,
    GithubEntity,
    ReleaseTarget,
    Job,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Resource => "resource",
            EntityKind::Deployment => "deployment",
            EntityKind::Environment => "environment",
            EntityKind::System => "system",
            EntityKind::DeploymentVersion => "deployment-version",
            EntityKind::Policy => "policy",
            EntityKind::PolicyBypass => "policy-bypass",
            EntityKind::PolicySkip => "policy-skip",
            EntityKind::Approval => "approval",
            EntityKind::JobAgent => "job-agent",
            EntityKind::WorkflowTemplate => "workflow-template",
            EntityKind::Workflow => "workflow",
            EntityKind::GithubEntity => "github-entity",
            EntityKind::ReleaseTarget => "release-target",
            EntityKind::Job => "job",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of delete events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

/// A concrete deploy destination (cluster, host, account, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, kind: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            identifier: id.to_string(),
            name: id.to_string(),
            id,
            workspace_id: None,
            kind: kind.into(),
            version: String::new(),
            created_at: DateTime::<Utc>::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.id.as_str().is_empty() {
            return Err(TypesError::Validation("resource id must not be empty".into()));
        }
        if self.kind.is_empty() {
            return Err(TypesError::Validation(format!("resource {} has no kind", self.id)));
        }
        Ok(())
    }
}

impl Selectable for Resource {
    fn field(&self, path: &str) -> Option<Cow<'_, str>> {
        match path {
            "id" => Some(Cow::Borrowed(self.id.as_str())),
            "identifier" => Some(Cow::Borrowed(&self.identifier)),
            "name" => Some(Cow::Borrowed(&self.name)),
            "kind" => Some(Cow::Borrowed(&self.kind)),
            "version" => Some(Cow::Borrowed(&self.version)),
            "createdAt" => Some(Cow::Owned(self.created_at.to_rfc3339())),
            other => metadata_field(&self.metadata, other),
        }
    }
}

/// A deployable unit belonging to a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: DeploymentId,
    #[serde(default)]
    pub name: String,
    pub system_id: SystemId,
    #[serde(default)]
    pub resource_selector: Option<Selector>,
    #[serde(default)]
    pub job_agent_id: Option<JobAgentId>,
    #[serde(default)]
    pub job_agent_config: serde_json::Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Deployment {
    pub fn new(id: impl Into<DeploymentId>, system_id: impl Into<SystemId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            system_id: system_id.into(),
            resource_selector: None,
            job_agent_id: None,
            job_agent_config: serde_json::Value::Null,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.resource_selector = Some(selector);
        self
    }

    pub fn with_job_agent(mut self, job_agent_id: impl Into<JobAgentId>) -> Self {
        self.job_agent_id = Some(job_agent_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.id.as_str().is_empty() {
            return Err(TypesError::Validation("deployment id must not be empty".into()));
        }
        if let Some(selector) = &self.resource_selector {
            selector.validate()?;
        }
        Ok(())
    }
}

impl Selectable for Deployment {
    fn field(&self, path: &str) -> Option<Cow<'_, str>> {
        match path {
            "id" => Some(Cow::Borrowed(self.id.as_str())),
            "name" => Some(Cow::Borrowed(&self.name)),
            "systemId" => Some(Cow::Borrowed(self.system_id.as_str())),
            other => metadata_field(&self.metadata, other),
        }
    }
}

/// A named stage (prod, staging, ...) belonging to a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    #[serde(default)]
    pub name: String,
    pub system_id: SystemId,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resource_selector: Option<Selector>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(id: impl Into<EnvironmentId>, system_id: impl Into<SystemId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            system_id: system_id.into(),
            created_at: DateTime::<Utc>::default(),
            resource_selector: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.resource_selector = Some(selector);
        self
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.id.as_str().is_empty() {
            return Err(TypesError::Validation("environment id must not be empty".into()));
        }
        if let Some(selector) = &self.resource_selector {
            selector.validate()?;
        }
        Ok(())
    }
}

impl Selectable for Environment {
    fn field(&self, path: &str) -> Option<Cow<'_, str>> {
        match path {
            "id" => Some(Cow::Borrowed(self.id.as_str())),
            "name" => Some(Cow::Borrowed(&self.name)),
            "systemId" => Some(Cow::Borrowed(self.system_id.as_str())),
            "createdAt" => Some(Cow::Owned(self.created_at.to_rfc3339())),
            other => metadata_field(&self.metadata, other),
        }
    }
}

fn metadata_field<'a>(metadata: &'a BTreeMap<String, String>, path: &str) -> Option<Cow<'a, str>> {
    path.strip_prefix("metadata.")
        .and_then(|key| metadata.get(key))
        .map(|v| Cow::Borrowed(v.as_str()))
}

/// Groups deployments and environments that release together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    pub id: SystemId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// An immutable build of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentVersion {
    pub id: VersionId,
    pub deployment_id: DeploymentId,
    #[serde(default)]
    pub tag: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl DeploymentVersion {
    pub fn new(
        id: impl Into<VersionId>,
        deployment_id: impl Into<DeploymentId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            tag: id.to_string(),
            id,
            deployment_id: deployment_id.into(),
            created_at,
            config: serde_json::Value::Null,
        }
    }
}

/// Which kinds of job an agent can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub workflows: bool,
    pub deployments: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            workflows: true,
            deployments: true,
        }
    }
}

/// An external execution system jobs are handed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAgent {
    pub id: JobAgentId,
    #[serde(default)]
    pub name: String,
    /// Matched against registered dispatcher types, e.g. `github-action`
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl JobAgent {
    pub fn new(id: impl Into<JobAgentId>, kind: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            kind: kind.into(),
            config: serde_json::Value::Null,
            capabilities: Capabilities::default(),
        }
    }
}

/// Declared input of a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    pub id: WorkflowTemplateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    #[serde(default)]
    pub job_agent_id: Option<JobAgentId>,
    #[serde(default)]
    pub job_agent_config: serde_json::Value,
}

/// An instantiation of a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: WorkflowId,
    pub workflow_template_id: WorkflowTemplateId,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl WorkflowTemplate {
    /// Merge instantiation inputs over template defaults
    pub fn resolve_inputs(
        &self,
        provided: &BTreeMap<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, serde_json::Value>, TypesError> {
        let mut resolved = BTreeMap::new();
        for input in &self.inputs {
            match provided.get(&input.name).or(input.default.as_ref()) {
                Some(value) => {
                    resolved.insert(input.name.clone(), value.clone());
                }
                None if input.required => {
                    return Err(TypesError::Validation(format!(
                        "workflow template {} requires input '{}'",
                        self.id, input.name
                    )));
                }
                None => {}
            }
        }
        for (name, value) in provided {
            resolved.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Ok(resolved)
    }
}

/// A GitHub organisation or user linked through an app installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubEntity {
    pub slug: String,
    pub installation_id: i64,
    #[serde(default)]
    pub entity_type: String,
}

/// A user approval of a version for one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub version_id: VersionId,
    pub environment_id: EnvironmentId,
    pub approver: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}
