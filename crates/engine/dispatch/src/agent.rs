//! The job agent contract
//!
//! A [`Dispatchable`] is an adapter to an external execution system (a CI
//! runner, a webhook endpoint). Agents are selected by matching
//! `JobAgent.kind` against [`Dispatchable::kind`]; the declared
//! [`Capabilities`] gate which jobs may go where.
//!
//! Dispatch is at-least-once. The same job may be handed over more than once
//! (retries, replays), so agents must deduplicate by `job.id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_types::{Capabilities, Job, JobId, Shutdown};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which capability a job requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobPurpose {
    Deployment,
    Workflow,
}

impl JobPurpose {
    pub fn of(job: &Job) -> Self {
        if job.subject.is_workflow() {
            JobPurpose::Workflow
        } else {
            JobPurpose::Deployment
        }
    }

    pub fn allowed_by(&self, capabilities: &Capabilities) -> bool {
        match self {
            JobPurpose::Deployment => capabilities.deployments,
            JobPurpose::Workflow => capabilities.workflows,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPurpose::Deployment => "deployments",
            JobPurpose::Workflow => "workflows",
        }
    }
}

/// Acknowledgement that an agent accepted a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub job_id: JobId,
    pub agent_kind: String,
    /// Agent-side reference (run id, message id), when the agent returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchReceipt {
    pub fn new(job: &Job, dispatched_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            agent_kind: job.agent_kind.clone(),
            external_ref: None,
            dispatched_at,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// A metric the agent will report on after dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSpec {
    pub name: String,
    /// Metric provider, e.g. `http` or `datadog`
    pub provider: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_count")]
    pub count: u32,
    /// Expression the measured value must satisfy
    #[serde(default)]
    pub success_condition: String,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_count() -> u32 {
    1
}

impl VerificationSpec {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            interval_secs: default_interval_secs(),
            count: default_count(),
            success_condition: String::new(),
        }
    }
}

/// Adapter to an external execution system
#[async_trait]
pub trait Dispatchable: Send + Sync + std::fmt::Debug {
    /// Dispatcher type matched against `JobAgent.kind`
    fn kind(&self) -> &str;

    /// Which kinds of job this dispatcher accepts
    fn supports(&self) -> Capabilities;

    /// Hand the job over
    ///
    /// Returns once the agent has accepted the job, not when it finishes;
    /// results arrive later as `job.updated` events.
    async fn dispatch(&self, job: &Job, shutdown: Shutdown) -> Result<DispatchReceipt>;

    /// Verification extension, if this dispatcher reports metrics
    fn as_verifiable(&self) -> Option<&dyn Verifiable> {
        None
    }
}

/// Dispatchers whose jobs carry verification metrics
///
/// The specs are persisted with the job record before dispatch so results
/// can always be correlated, even after a crash mid-dispatch.
pub trait Verifiable: Send + Sync {
    fn verification_specs(&self, job: &Job) -> Result<Vec<VerificationSpec>>;
}
