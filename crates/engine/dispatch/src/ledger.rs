//! Job ledger
//!
//! The durable record of every job handed to an agent, together with the
//! verification specs the agent will report against. A job and its specs are
//! written in one step, before the agent sees the job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_types::{Job, JobId, JobStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::VerificationSpec;
use crate::error::{DispatchError, Result};

/// A persisted job with its verification specs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub job: Job,
    #[serde(default)]
    pub verifications: Vec<VerificationSpec>,
    /// Number of times the job was handed to an agent
    pub attempts: u32,
}

#[async_trait]
pub trait JobLedger: Send + Sync + std::fmt::Debug {
    /// Persist a job and its specs atomically
    ///
    /// Re-persisting an existing job replaces its record and bumps the
    /// attempt count.
    async fn persist(&self, job: &Job, verifications: &[VerificationSpec]) -> Result<()>;

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get(&self, job_id: &JobId) -> Result<Option<LedgerEntry>>;
}

/// In-memory ledger
///
/// One lock guards the whole table, so a job and its specs become visible
/// together.
#[derive(Debug, Default)]
pub struct InMemoryJobLedger {
    entries: RwLock<BTreeMap<JobId, LedgerEntry>>,
}

impl InMemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl JobLedger for InMemoryJobLedger {
    async fn persist(&self, job: &Job, verifications: &[VerificationSpec]) -> Result<()> {
        let mut entries = self.entries.write();
        let attempts = entries.get(&job.id).map_or(0, |e| e.attempts) + 1;
        entries.insert(
            job.id,
            LedgerEntry {
                job: job.clone(),
                verifications: verifications.to_vec(),
                attempts,
            },
        );
        Ok(())
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| DispatchError::Ledger(format!("job {job_id} was never persisted")))?;
        entry.job.transition(status, message, at);
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.read().get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_types::{JobAgentId, JobSubject, ReleaseTarget, VersionId};

    fn job() -> Job {
        let at = DateTime::<Utc>::default();
        Job {
            id: JobId::derive(&["d1:e1:r1", "v1", "0"]),
            subject: JobSubject::Release {
                release_target: ReleaseTarget::new("d1", "e1", "r1"),
                version_id: VersionId::new("v1"),
                generation: 0,
            },
            job_agent_id: JobAgentId::new("default"),
            agent_kind: "github-action".into(),
            job_agent_config: serde_json::Value::Null,
            status: JobStatus::Pending,
            message: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_persist_keeps_specs_with_job() {
        let ledger = InMemoryJobLedger::new();
        let job = job();
        let specs = vec![VerificationSpec::new("error-rate", "http")];

        ledger.persist(&job, &specs).await.unwrap();
        ledger.persist(&job, &specs).await.unwrap();

        let entry = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(entry.verifications, specs);
        assert_eq!(entry.attempts, 2);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_persisted_job() {
        let ledger = InMemoryJobLedger::new();
        let job = job();
        let at = DateTime::<Utc>::default();

        assert!(ledger
            .update_status(&job.id, JobStatus::Dispatched, None, at)
            .await
            .is_err());

        ledger.persist(&job, &[]).await.unwrap();
        ledger
            .update_status(&job.id, JobStatus::Failed, Some("rejected".into()), at)
            .await
            .unwrap();
        let entry = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(entry.job.status, JobStatus::Failed);
        assert_eq!(entry.job.message.as_deref(), Some("rejected"));
    }
}
