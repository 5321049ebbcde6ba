//! Dispatch gateway
//!
//! Resolves which agent a job goes to, persists the job record and its
//! verification specs, then hands the job to the matching dispatcher. At
//! most `max_concurrent_dispatches` dispatch calls run at once.

use chrono::{DateTime, Utc};
use engine_types::{Job, JobAgent, JobAgentId, JobStatus, Shutdown};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::agent::{DispatchReceipt, Dispatchable, JobPurpose};
use crate::error::{DispatchError, Result};
use crate::ledger::JobLedger;
use crate::memory::DEFAULT_AGENT_KIND;
use crate::registry::AgentRegistry;

/// Agent id used when no configured job agent qualifies
pub const DEFAULT_AGENT_ID: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upper bound on concurrent dispatch calls
    pub max_concurrent_dispatches: usize,

    /// Dispatcher type used when no configured job agent qualifies
    pub default_agent_kind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: 16,
            default_agent_kind: DEFAULT_AGENT_KIND.to_string(),
        }
    }
}

/// The agent a job will be rendered for
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAgent {
    pub agent_id: JobAgentId,
    pub kind: String,
    pub config: serde_json::Value,
}

#[derive(Debug)]
pub struct DispatchGateway {
    registry: AgentRegistry,
    ledger: Arc<dyn JobLedger>,
    permits: Arc<Semaphore>,
    config: GatewayConfig,
}

impl DispatchGateway {
    pub fn new(registry: AgentRegistry, ledger: Arc<dyn JobLedger>, config: GatewayConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatches.max(1)));
        Self {
            registry,
            ledger,
            permits,
            config,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<dyn JobLedger> {
        &self.ledger
    }

    /// Whether an agent qualifies: its type is registered and both the
    /// agent and its dispatcher allow `purpose`
    fn qualifies(&self, agent: &JobAgent, purpose: JobPurpose) -> Option<Arc<dyn Dispatchable>> {
        let dispatcher = self.registry.get(&agent.kind)?;
        (purpose.allowed_by(&agent.capabilities) && purpose.allowed_by(&dispatcher.supports()))
            .then_some(dispatcher)
    }

    /// Pick the agent for a job
    ///
    /// Order: the explicitly requested agent; else the first configured agent
    /// (by id) that qualifies; else the default dispatcher type.
    pub fn resolve(
        &self,
        agents: &[JobAgent],
        requested: Option<&JobAgentId>,
        purpose: JobPurpose,
    ) -> Result<ResolvedAgent> {
        if let Some(id) = requested {
            let agent = agents
                .iter()
                .find(|a| a.id == *id)
                .ok_or_else(|| DispatchError::NoAgent(format!("job agent {id} does not exist")))?;
            if !self.registry.contains(&agent.kind) {
                return Err(DispatchError::NoAgent(format!(
                    "job agent {id} has unregistered type {}",
                    agent.kind
                )));
            }
            if self.qualifies(agent, purpose).is_none() {
                return Err(DispatchError::Unsupported {
                    kind: agent.kind.clone(),
                    capability: purpose.as_str(),
                });
            }
            return Ok(ResolvedAgent {
                agent_id: agent.id.clone(),
                kind: agent.kind.clone(),
                config: agent.config.clone(),
            });
        }

        let mut sorted: Vec<&JobAgent> = agents.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(agent) = sorted.into_iter().find(|a| self.qualifies(a, purpose).is_some()) {
            return Ok(ResolvedAgent {
                agent_id: agent.id.clone(),
                kind: agent.kind.clone(),
                config: agent.config.clone(),
            });
        }

        let kind = &self.config.default_agent_kind;
        match self.registry.get(kind) {
            Some(dispatcher) if purpose.allowed_by(&dispatcher.supports()) => Ok(ResolvedAgent {
                agent_id: JobAgentId::new(DEFAULT_AGENT_ID),
                kind: kind.clone(),
                config: serde_json::Value::Null,
            }),
            Some(_) => Err(DispatchError::Unsupported {
                kind: kind.clone(),
                capability: purpose.as_str(),
            }),
            None => Err(DispatchError::NoAgent(format!(
                "no job agent supports {} and default type {kind} is not registered",
                purpose.as_str()
            ))),
        }
    }

    /// Persist the job, then hand it to its dispatcher
    ///
    /// On a permanent failure the ledger records the job as failed. Transient
    /// failures leave it pending; the caller decides when to retry.
    #[instrument(skip(self, job, shutdown), fields(job_id = %job.id, kind = %job.agent_kind))]
    pub async fn dispatch(&self, job: &Job, mut shutdown: Shutdown, now: DateTime<Utc>) -> Result<DispatchReceipt> {
        let dispatcher = self
            .registry
            .get(&job.agent_kind)
            .ok_or_else(|| DispatchError::NoAgent(format!("type {} is not registered", job.agent_kind)))?;
        let purpose = JobPurpose::of(job);
        if !purpose.allowed_by(&dispatcher.supports()) {
            return Err(DispatchError::Unsupported {
                kind: job.agent_kind.clone(),
                capability: purpose.as_str(),
            });
        }

        let _permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| DispatchError::Cancelled)?
            }
            _ = shutdown.cancelled() => return Err(DispatchError::Cancelled),
        };

        let verifications = match dispatcher.as_verifiable() {
            Some(v) => v.verification_specs(job)?,
            None => Vec::new(),
        };
        self.ledger.persist(job, &verifications).await?;

        match dispatcher.dispatch(job, shutdown).await {
            Ok(receipt) => {
                self.ledger
                    .update_status(&job.id, JobStatus::Dispatched, None, now)
                    .await?;
                info!(verifications = verifications.len(), "Job dispatched");
                Ok(receipt)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Transient dispatch failure");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Dispatch failed permanently");
                self.ledger
                    .update_status(&job.id, JobStatus::Failed, Some(e.to_string()), now)
                    .await?;
                Err(e)
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::VerificationSpec;
    use crate::ledger::InMemoryJobLedger;
    use crate::memory::InMemoryAgent;
    use engine_types::{Capabilities, JobId, JobSubject, ReleaseTarget, VersionId, WorkflowId};
    use std::collections::BTreeMap;

    fn at() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    fn release_job(kind: &str) -> Job {
        Job {
            id: JobId::derive(&["d1:e1:r1", "v1", "0"]),
            subject: JobSubject::Release {
                release_target: ReleaseTarget::new("d1", "e1", "r1"),
                version_id: VersionId::new("v1"),
                generation: 0,
            },
            job_agent_id: JobAgentId::new(DEFAULT_AGENT_ID),
            agent_kind: kind.into(),
            job_agent_config: serde_json::Value::Null,
            status: JobStatus::Pending,
            message: None,
            created_at: at(),
            updated_at: at(),
        }
    }

    fn gateway(agents: Vec<Arc<InMemoryAgent>>) -> (DispatchGateway, Arc<InMemoryJobLedger>) {
        let registry = AgentRegistry::new();
        for agent in agents {
            registry.register(agent);
        }
        let ledger = Arc::new(InMemoryJobLedger::new());
        let gateway = DispatchGateway::new(registry, ledger.clone(), GatewayConfig::default());
        (gateway, ledger)
    }

    #[test]
    fn test_resolve_prefers_requested_agent() {
        let (gateway, _) = gateway(vec![
            Arc::new(InMemoryAgent::default()),
            Arc::new(InMemoryAgent::new("webhook")),
        ]);
        let agents = vec![
            JobAgent::new("a1", "github-action"),
            JobAgent::new("a2", "webhook"),
        ];

        let resolved = gateway
            .resolve(&agents, Some(&JobAgentId::new("a2")), JobPurpose::Deployment)
            .unwrap();
        assert_eq!(resolved.kind, "webhook");

        let resolved = gateway.resolve(&agents, None, JobPurpose::Deployment).unwrap();
        assert_eq!(resolved.agent_id, JobAgentId::new("a1"));

        let missing = gateway.resolve(&agents, Some(&JobAgentId::new("a9")), JobPurpose::Deployment);
        assert!(matches!(missing, Err(DispatchError::NoAgent(_))));
    }

    #[test]
    fn test_resolve_gates_on_capabilities() {
        let (gateway, _) = gateway(vec![Arc::new(InMemoryAgent::default().with_capabilities(
            Capabilities {
                workflows: false,
                deployments: true,
            },
        ))]);
        let agents = vec![JobAgent::new("a1", "github-action")];

        let err = gateway
            .resolve(&agents, Some(&JobAgentId::new("a1")), JobPurpose::Workflow)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { capability: "workflows", .. }));
        assert!(gateway.resolve(&agents, None, JobPurpose::Workflow).is_err());
    }

    #[test]
    fn test_resolve_falls_back_to_default_kind() {
        let (gateway, _) = gateway(vec![Arc::new(InMemoryAgent::default())]);
        let agents = vec![JobAgent::new("argo-1", "argo")];

        let resolved = gateway.resolve(&agents, None, JobPurpose::Deployment).unwrap();
        assert_eq!(resolved.agent_id, JobAgentId::new(DEFAULT_AGENT_ID));
        assert_eq!(resolved.kind, DEFAULT_AGENT_KIND);
    }

    #[tokio::test]
    async fn test_dispatch_persists_specs_before_handover() {
        let agent = Arc::new(
            InMemoryAgent::default().with_verifications(vec![VerificationSpec::new("error-rate", "http")]),
        );
        let (gateway, ledger) = gateway(vec![agent.clone()]);
        let job = release_job(DEFAULT_AGENT_KIND);

        gateway.dispatch(&job, Shutdown::never(), at()).await.unwrap();

        assert_eq!(agent.count_for(&job.id), 1);
        let entry = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(entry.job.status, JobStatus::Dispatched);
        assert_eq!(entry.verifications.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_marks_job_failed() {
        let agent = Arc::new(InMemoryAgent::default());
        agent.fail_next(DispatchError::Permanent("bad config".into()));
        agent.fail_next(DispatchError::Transient("busy".into()));
        let (gateway, ledger) = gateway(vec![agent.clone()]);
        let job = release_job(DEFAULT_AGENT_KIND);

        let err = gateway.dispatch(&job, Shutdown::never(), at()).await.unwrap_err();
        assert!(!err.is_transient());
        let entry = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(entry.job.status, JobStatus::Failed);

        let err = gateway.dispatch(&job, Shutdown::never(), at()).await.unwrap_err();
        assert!(err.is_transient());
        let entry = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(entry.job.status, JobStatus::Pending);
        assert_eq!(entry.attempts, 2);
    }

    #[tokio::test]
    async fn test_workflow_job_needs_workflow_capability() {
        let agent = Arc::new(InMemoryAgent::default().with_capabilities(Capabilities {
            workflows: false,
            deployments: true,
        }));
        let (gateway, ledger) = gateway(vec![agent.clone()]);
        let mut job = release_job(DEFAULT_AGENT_KIND);
        job.subject = JobSubject::Workflow {
            workflow_id: WorkflowId::new("w1"),
            inputs: BTreeMap::new(),
        };

        let err = gateway.dispatch(&job, Shutdown::never(), at()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
        assert_eq!(agent.dispatch_count(), 0);
        assert!(ledger.is_empty());
    }
}
