//! In-memory recording agent for tests and development.
//!
//! Accepts every job and remembers it. Failures can be scripted to exercise
//! retry paths.

use async_trait::async_trait;
use chrono::Utc;
use engine_types::{Capabilities, Job, JobId, Shutdown};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

use crate::agent::{DispatchReceipt, Dispatchable, Verifiable, VerificationSpec};
use crate::error::{DispatchError, Result};

pub const DEFAULT_AGENT_KIND: &str = "github-action";

#[derive(Debug, Default)]
struct AgentState {
    dispatched: Vec<Job>,
    scripted_failures: VecDeque<DispatchError>,
}

#[derive(Debug)]
pub struct InMemoryAgent {
    kind: String,
    capabilities: Capabilities,
    verifications: Vec<VerificationSpec>,
    state: Mutex<AgentState>,
}

impl Default for InMemoryAgent {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_KIND)
    }
}

impl InMemoryAgent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            capabilities: Capabilities::default(),
            verifications: Vec::new(),
            state: Mutex::new(AgentState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Report these verification specs for every job
    pub fn with_verifications(mut self, verifications: Vec<VerificationSpec>) -> Self {
        self.verifications = verifications;
        self
    }

    /// Fail the next dispatch with `error`; queued failures apply in order
    pub fn fail_next(&self, error: DispatchError) {
        self.state.lock().scripted_failures.push_back(error);
    }

    /// Every accepted job, in dispatch order
    pub fn dispatched(&self) -> Vec<Job> {
        self.state.lock().dispatched.clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.state.lock().dispatched.len()
    }

    /// How many times a job with this id was accepted
    pub fn count_for(&self, job_id: &JobId) -> usize {
        self.state
            .lock()
            .dispatched
            .iter()
            .filter(|j| j.id == *job_id)
            .count()
    }
}

#[async_trait]
impl Dispatchable for InMemoryAgent {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn supports(&self) -> Capabilities {
        self.capabilities
    }

    async fn dispatch(&self, job: &Job, shutdown: Shutdown) -> Result<DispatchReceipt> {
        if shutdown.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let mut state = self.state.lock();
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        state.dispatched.push(job.clone());
        debug!(job_id = %job.id, kind = %self.kind, "Recorded dispatch");
        Ok(DispatchReceipt::new(job, Utc::now()).with_external_ref(format!("mem-{}", state.dispatched.len())))
    }

    fn as_verifiable(&self) -> Option<&dyn Verifiable> {
        if self.verifications.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl Verifiable for InMemoryAgent {
    fn verification_specs(&self, _job: &Job) -> Result<Vec<VerificationSpec>> {
        Ok(self.verifications.clone())
    }
}
