//! The release manager
//!
//! Owns the reconciliation state of every release target of one workspace
//! and every job it created. Reconciliation of a target is serialised by its
//! phase: a target that is dispatching or in flight does not start another
//! evaluation, the trigger is folded into its `pending` flag instead.
//!
//! Job generations come from the store, where only events advance them, so
//! job ids do not depend on when reconciliation happens to run. Jobs the
//! manager itself fails or cancels are announced on a broadcast channel, in
//! the same `JobUpdate` shape agents report results in.
//!
//! Lock order: the store is read before the manager lock is taken, and the
//! manager lock is never held across a dispatch call.

use chrono::{DateTime, Utc};
use engine_dispatch::{DispatchError, DispatchGateway, JobPurpose, RetryPolicy};
use engine_policy::PolicyDecision;
use engine_store::{EntityStore, NotificationBatch, TargetGeneration};
use engine_types::{
    Clock, EntityKind, Job, JobId, JobStatus, JobSubject, JobUpdate, ReleaseTarget, Shutdown,
    VersionId, Workflow, WorkflowTemplate,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::candidate::{select_candidate, Selection};
use crate::error::{ReleaseError, Result};
use crate::state::{Phase, TargetState, Wait};

/// Results held for jobs not created yet; the oldest is dropped beyond this
pub const DEFAULT_EARLY_RESULT_LIMIT: usize = 4096;

const RESULT_CHANNEL_CAPACITY: usize = 256;

/// What one reconciliation of one target did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A job was accepted by its agent
    Dispatched(JobId),
    /// The target was busy; the trigger is pending
    Coalesced,
    Deferred(DateTime<Utc>),
    Denied(String),
    /// No agent can take the job
    Blocked(String),
    BackingOff(DateTime<Utc>),
    /// The job failed permanently or ran out of retries
    Failed(JobId),
    /// The job's result was already known; nothing dispatched
    Settled(JobId),
    /// Shutdown interrupted the dispatch
    Interrupted,
    UpToDate,
    Terminal,
    Unknown,
}

/// Release targets that appeared or disappeared since the last sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetChanges {
    pub created: Vec<ReleaseTarget>,
    pub destroyed: Vec<ReleaseTarget>,
}

impl TargetChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub changes: TargetChanges,
    pub outcomes: BTreeMap<ReleaseTarget, ReconcileOutcome>,
    pub workflow_jobs: Vec<JobId>,
}

impl ReconcileSummary {
    /// Release jobs accepted during this pass
    pub fn dispatched(&self) -> Vec<JobId> {
        self.outcomes
            .values()
            .filter_map(|o| match o {
                ReconcileOutcome::Dispatched(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    targets: BTreeMap<ReleaseTarget, TargetState>,
    jobs: BTreeMap<JobId, Job>,
    /// Results that arrived before their job was created, as during replay
    early_results: BTreeMap<JobId, JobUpdate>,
    /// Arrival order of `early_results`, oldest first
    early_order: VecDeque<JobId>,
    workflow_queue: VecDeque<JobId>,
    workflow_failures: BTreeMap<JobId, u32>,
}

impl ManagerState {
    /// Hold a result for a job not created yet; returns the ids evicted to
    /// stay within `limit`
    fn hold_early_result(&mut self, update: JobUpdate, limit: usize) -> Vec<JobId> {
        if self.early_results.insert(update.job_id, update.clone()).is_none() {
            self.early_order.push_back(update.job_id);
        }
        let mut evicted = Vec::new();
        while self.early_results.len() > limit {
            let Some(oldest) = self.early_order.pop_front() else {
                break;
            };
            if self.early_results.remove(&oldest).is_some() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    fn take_early_result(&mut self, job_id: &JobId) -> Option<JobUpdate> {
        let update = self.early_results.remove(job_id)?;
        self.early_order.retain(|id| id != job_id);
        Some(update)
    }
}

#[derive(Debug)]
pub struct ReleaseManager {
    store: Arc<EntityStore>,
    gateway: Arc<DispatchGateway>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    early_result_limit: usize,
    results: broadcast::Sender<JobUpdate>,
    state: Mutex<ManagerState>,
}

impl ReleaseManager {
    pub fn new(
        store: Arc<EntityStore>,
        gateway: Arc<DispatchGateway>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            store,
            gateway,
            clock,
            retry,
            early_result_limit: DEFAULT_EARLY_RESULT_LIMIT,
            results,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn with_early_result_limit(mut self, limit: usize) -> Self {
        self.early_result_limit = limit.max(1);
        self
    }

    pub fn gateway(&self) -> &Arc<DispatchGateway> {
        &self.gateway
    }

    /// Jobs failed or cancelled by the engine, as result events
    pub fn subscribe_results(&self) -> broadcast::Receiver<JobUpdate> {
        self.results.subscribe()
    }

    /// Move a job to a terminal status decided here and announce it
    fn fail_job(&self, job: &mut Job, status: JobStatus, message: String, at: DateTime<Utc>) {
        job.transition(status, Some(message.clone()), at);
        // No subscribers is fine
        let _ = self.results.send(JobUpdate {
            job_id: job.id,
            status,
            message: Some(message),
        });
    }

    // ------------------------------------------------------------------
    // Target lifecycle
    // ------------------------------------------------------------------

    /// Align tracked targets with the store's derived set
    ///
    /// Destroyed targets become terminal and their active jobs are
    /// cancelled. A target the store recreated, whether or not this manager
    /// saw it disappear in between, starts over at the store's generation.
    pub fn sync_targets(&self) -> TargetChanges {
        let live = self.store.release_target_generations();
        let now = self.clock.now();
        let mut changes = TargetChanges::default();
        let mut cancelled = Vec::new();
        let mut retired = Vec::new();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (target, ts) in state.targets.iter_mut() {
            if ts.phase != Phase::Terminal && !live.contains_key(target) {
                cancelled.extend(cancel_active_jobs(&mut state.jobs, target, None, "release target destroyed", now));
                ts.phase = Phase::Terminal;
                ts.pending = false;
                ts.redeploy = false;
                retired.push((target.clone(), ts.generation));
                changes.destroyed.push(target.clone());
            }
        }
        for (target, current) in live {
            match state.targets.get_mut(&target) {
                Some(ts) if ts.phase == Phase::Terminal => {
                    *ts = TargetState::fresh(current);
                    changes.created.push(target);
                }
                Some(ts) if ts.incarnation != current.incarnation => {
                    cancelled.extend(cancel_active_jobs(&mut state.jobs, &target, None, "release target recreated", now));
                    retired.push((target.clone(), ts.generation));
                    *ts = TargetState::fresh(current);
                    changes.destroyed.push(target.clone());
                    changes.created.push(target);
                }
                Some(ts) => ts.generation = ts.generation.max(current.generation),
                None => {
                    state.targets.insert(target.clone(), TargetState::fresh(current));
                    changes.created.push(target);
                }
            }
        }
        drop(guard);
        for update in cancelled {
            let _ = self.results.send(update);
        }
        if !retired.is_empty() {
            self.drop_stale_early_results(&retired);
        }

        if !changes.is_empty() {
            info!(
                created = changes.created.len(),
                destroyed = changes.destroyed.len(),
                "Release targets changed"
            );
        }
        changes
    }

    /// Forget held results for any job a retired target could have run
    ///
    /// A revived target starts at a higher generation, so ids derived from
    /// the retired generations can never come up again.
    fn drop_stale_early_results(&self, retired: &[(ReleaseTarget, u64)]) {
        let mut ids = Vec::new();
        for (target, generation) in retired {
            let key = target.key();
            for version in self.store.candidate_versions(&target.deployment_id) {
                for g in 0..=*generation {
                    ids.push(JobId::derive(&[&key, version.id.as_str(), &g.to_string()]));
                }
            }
        }
        let mut state = self.state.lock();
        let mut dropped = 0;
        for id in &ids {
            if state.take_early_result(id).is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "Held results of retired targets dropped");
        }
    }

    /// Force the deployed version back through the pipeline
    ///
    /// The store has already advanced the target's generation for the
    /// command; returns it. A target this manager tracks under an older
    /// incarnation is left to [`sync_targets`](Self::sync_targets), which
    /// starts it over with nothing deployed.
    pub fn request_redeploy(&self, target: &ReleaseTarget) -> Result<u64> {
        let current: TargetGeneration = self
            .store
            .release_target_generation(target)
            .ok_or_else(|| ReleaseError::UnknownTarget(target.clone()))?;
        let mut state = self.state.lock();
        if let Some(ts) = state.targets.get_mut(target) {
            if ts.phase != Phase::Terminal && ts.incarnation == current.incarnation {
                ts.generation = ts.generation.max(current.generation);
                ts.redeploy = true;
                if ts.phase.is_busy() {
                    ts.pending = true;
                }
            }
        }
        info!(release_target = %target, generation = current.generation, "Redeploy requested");
        Ok(current.generation)
    }

    // ------------------------------------------------------------------
    // Job results
    // ------------------------------------------------------------------

    /// Apply a result reported by an agent
    ///
    /// Returns the release target to reconcile next, if the result freed it.
    /// Results for jobs not created yet are held and applied on creation.
    pub fn apply_job_update(&self, update: &JobUpdate, at: DateTime<Utc>) -> Option<ReleaseTarget> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(job) = state.jobs.get_mut(&update.job_id) else {
            debug!(job_id = %update.job_id, status = %update.status, "Result for unknown job held");
            let evicted = state.hold_early_result(update.clone(), self.early_result_limit);
            for job_id in evicted {
                warn!(job_id = %job_id, limit = self.early_result_limit, "Early job result dropped");
            }
            return None;
        };
        if job.status.is_terminal() {
            debug!(job_id = %job.id, status = %job.status, "Job already settled, result ignored");
            return None;
        }
        job.transition(update.status, update.message.clone(), at);
        info!(job_id = %job.id, status = %update.status, "Job updated");

        let target = job.release_target()?.clone();
        let version = job.version_id().cloned();
        let ts = state.targets.get_mut(&target)?;
        if ts.phase == Phase::Terminal || !update.status.is_terminal() {
            return None;
        }
        if update.status == JobStatus::Succeeded {
            ts.deployed = version;
        }
        if ts.phase.job() == Some(update.job_id) {
            ts.phase = Phase::Idle;
            ts.pending = false;
            ts.failures = 0;
        }
        Some(target)
    }

    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    /// Queue a workflow job if the template names an agent that runs
    /// workflows; returns the job id when one was queued
    pub fn submit_workflow(&self, workflow: &Workflow, template: &WorkflowTemplate) -> Option<JobId> {
        let requested = template.job_agent_id.as_ref()?;
        let agents = self.store.job_agents().values();
        let resolved = match self.gateway.resolve(&agents, Some(requested), JobPurpose::Workflow) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(workflow_id = %workflow.id, error = %e, "Workflow not dispatchable");
                return None;
            }
        };

        let now = self.clock.now();
        let job_id = JobId::derive(&["workflow", workflow.id.as_str()]);
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job_id) {
            return None;
        }
        let mut job = Job {
            id: job_id,
            subject: JobSubject::Workflow {
                workflow_id: workflow.id.clone(),
                inputs: workflow.inputs.clone(),
            },
            job_agent_id: resolved.agent_id,
            agent_kind: resolved.kind,
            job_agent_config: merge_config(&resolved.config, &template.job_agent_config),
            status: JobStatus::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(result) = state.take_early_result(&job_id) {
            job.transition(result.status, result.message, now);
        }
        if job.status == JobStatus::Pending {
            state.workflow_queue.push_back(job_id);
        }
        state.jobs.insert(job_id, job);
        info!(workflow_id = %workflow.id, job_id = %job_id, "Workflow job queued");
        Some(job_id)
    }

    async fn dispatch_workflows(&self, shutdown: &Shutdown) -> Vec<JobId> {
        let queued: Vec<Job> = {
            let mut state = self.state.lock();
            let ids: Vec<JobId> = state.workflow_queue.drain(..).collect();
            ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect()
        };

        let mut dispatched = Vec::new();
        for job in queued {
            let result = self.gateway.dispatch(&job, shutdown.clone(), self.clock.now()).await;
            let now = self.clock.now();
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(stored) = state.jobs.get_mut(&job.id) else {
                continue;
            };
            match result {
                Ok(_) => {
                    stored.transition(JobStatus::Dispatched, None, now);
                    state.workflow_failures.remove(&job.id);
                    dispatched.push(job.id);
                }
                Err(e) if e.is_transient() => {
                    let failures = state.workflow_failures.entry(job.id).or_default();
                    *failures += 1;
                    if self.retry.delay_for(*failures).is_some() {
                        state.workflow_queue.push_back(job.id);
                    } else {
                        let message = format!("gave up after {} attempts: {e}", *failures);
                        state.workflow_failures.remove(&job.id);
                        warn!(job_id = %job.id, "{message}");
                        self.fail_job(stored, JobStatus::Failed, message, now);
                    }
                }
                Err(DispatchError::Cancelled) => state.workflow_queue.push_back(job.id),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Workflow job failed");
                    self.fail_job(stored, JobStatus::Failed, e.to_string(), now);
                }
            }
        }
        dispatched
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Sync targets, dispatch queued workflows, then reconcile every target
    pub async fn reconcile_all(&self, shutdown: Shutdown) -> ReconcileSummary {
        self.reconcile(None, shutdown).await
    }

    /// Like [`reconcile_all`](Self::reconcile_all), restricted to `targets`
    /// when given
    pub async fn reconcile(&self, targets: Option<BTreeSet<ReleaseTarget>>, shutdown: Shutdown) -> ReconcileSummary {
        let changes = self.sync_targets();
        let workflow_jobs = self.dispatch_workflows(&shutdown).await;

        let mut selected: BTreeSet<ReleaseTarget> = match targets {
            Some(targets) => targets,
            None => self.live_targets().into_iter().collect(),
        };
        selected.extend(changes.created.iter().cloned());

        let runs = selected.iter().map(|t| self.reconcile_target(t, shutdown.clone()));
        let outcomes = join_all(runs).await;

        ReconcileSummary {
            changes,
            outcomes: selected.into_iter().zip(outcomes).collect(),
            workflow_jobs,
        }
    }

    /// Run one target through selection, evaluation and dispatch
    #[instrument(skip(self, target, shutdown), fields(release_target = %target))]
    pub async fn reconcile_target(&self, target: &ReleaseTarget, shutdown: Shutdown) -> ReconcileOutcome {
        let now = self.clock.now();
        let current = self.store.release_target_generation(target);
        let (deployed, redeploy, generation) = {
            let mut state = self.state.lock();
            let Some(ts) = state.targets.get_mut(target) else {
                return ReconcileOutcome::Unknown;
            };
            if let Some(current) = current.filter(|c| c.incarnation == ts.incarnation) {
                ts.generation = ts.generation.max(current.generation);
            }
            match &ts.phase {
                Phase::Terminal => return ReconcileOutcome::Terminal,
                phase if phase.is_busy() => {
                    ts.pending = true;
                    return ReconcileOutcome::Coalesced;
                }
                Phase::Waiting {
                    wait: Wait::Backoff { until, .. },
                } if now < *until => return ReconcileOutcome::BackingOff(*until),
                _ => {}
            }
            ts.phase = Phase::Evaluating;
            (ts.deployed.clone(), ts.redeploy, ts.generation)
        };

        let version = match select_candidate(&self.store, target, deployed.as_ref(), redeploy, now) {
            Selection::Chosen { version, report } => {
                self.with_evaluating(target, |ts| ts.last_decision = Some(report.decision));
                version
            }
            Selection::Deferred { until } => {
                return self.settle(
                    target,
                    Phase::Waiting {
                        wait: Wait::Deferred { until },
                    },
                    Some(PolicyDecision::defer(until)),
                    ReconcileOutcome::Deferred(until),
                );
            }
            Selection::Denied { reason } => {
                return self.settle(
                    target,
                    Phase::Waiting {
                        wait: Wait::Denied {
                            reason: reason.clone(),
                        },
                    },
                    Some(PolicyDecision::deny(reason.clone())),
                    ReconcileOutcome::Denied(reason),
                );
            }
            Selection::UpToDate | Selection::NoVersions => {
                return self.settle(target, Phase::Idle, None, ReconcileOutcome::UpToDate);
            }
        };

        let deployment = self.store.deployments().get(&target.deployment_id);
        let requested = deployment.as_ref().and_then(|d| d.job_agent_id.clone());
        let agents = self.store.job_agents().values();
        let resolved = match self
            .gateway
            .resolve(&agents, requested.as_ref(), JobPurpose::Deployment)
        {
            Ok(resolved) => resolved,
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "No agent for release job");
                return self.settle(
                    target,
                    Phase::Waiting {
                        wait: Wait::Blocked {
                            reason: reason.clone(),
                        },
                    },
                    None,
                    ReconcileOutcome::Blocked(reason),
                );
            }
        };
        let job_agent_config = match &deployment {
            Some(d) => merge_config(&resolved.config, &d.job_agent_config),
            None => resolved.config.clone(),
        };

        let job_id = JobId::derive(&[&target.key(), version.id.as_str(), &generation.to_string()]);
        let job = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(ts) = state.targets.get_mut(target) else {
                return ReconcileOutcome::Unknown;
            };
            if ts.phase != Phase::Evaluating {
                return ReconcileOutcome::Terminal;
            }
            if ts.generation != generation {
                // A redeploy landed mid-evaluation; the next pass picks it up.
                ts.phase = Phase::Idle;
                ts.pending = true;
                return ReconcileOutcome::Coalesced;
            }

            match state.jobs.get(&job_id).map(|j| j.status) {
                Some(JobStatus::Succeeded) => {
                    ts.deployed = Some(version.id.clone());
                    ts.redeploy = false;
                    ts.phase = Phase::Idle;
                    return ReconcileOutcome::Settled(job_id);
                }
                Some(JobStatus::Failed) | Some(JobStatus::Cancelled) => {
                    ts.redeploy = false;
                    ts.phase = Phase::Idle;
                    return ReconcileOutcome::Failed(job_id);
                }
                Some(JobStatus::Dispatched) => {
                    ts.phase = Phase::InFlight { job_id };
                    return ReconcileOutcome::Coalesced;
                }
                Some(JobStatus::Pending) => {}
                None => {
                    let superseded = cancel_active_jobs(&mut state.jobs, target, Some(job_id), "superseded", now);
                    for update in superseded {
                        let _ = self.results.send(update);
                    }
                    let mut job = Job {
                        id: job_id,
                        subject: JobSubject::Release {
                            release_target: target.clone(),
                            version_id: version.id.clone(),
                            generation,
                        },
                        job_agent_id: resolved.agent_id,
                        agent_kind: resolved.kind,
                        job_agent_config,
                        status: JobStatus::Pending,
                        message: None,
                        created_at: now,
                        updated_at: now,
                    };
                    let early = state.early_results.remove(&job_id);
                    if early.is_some() {
                        state.early_order.retain(|id| id != &job_id);
                    }
                    if let Some(result) = early {
                        job.transition(result.status, result.message, now);
                        ts.redeploy = false;
                        ts.phase = match job.status {
                            JobStatus::Dispatched => Phase::InFlight { job_id },
                            _ => Phase::Idle,
                        };
                        if job.status == JobStatus::Succeeded {
                            ts.deployed = Some(version.id.clone());
                        }
                        if job.status != JobStatus::Pending {
                            state.jobs.insert(job_id, job);
                            return ReconcileOutcome::Settled(job_id);
                        }
                    }
                    info!(job_id = %job_id, version_id = %version.id, generation, "Release job created");
                    state.jobs.insert(job_id, job);
                }
            }

            ts.redeploy = false;
            ts.phase = Phase::Dispatching { job_id };
            match state.jobs.get(&job_id) {
                Some(job) => job.clone(),
                None => return ReconcileOutcome::Unknown,
            }
        };

        let result = self.gateway.dispatch(&job, shutdown, now).await;
        self.finish_dispatch(target, job_id, result.map(|_| ()))
    }

    fn finish_dispatch(
        &self,
        target: &ReleaseTarget,
        job_id: JobId,
        result: std::result::Result<(), DispatchError>,
    ) -> ReconcileOutcome {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let current = state
            .targets
            .get_mut(target)
            .filter(|ts| ts.phase == Phase::Dispatching { job_id });
        let Some(ts) = current else {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                if job.status.is_active() {
                    self.fail_job(
                        job,
                        JobStatus::Cancelled,
                        "release target changed during dispatch".into(),
                        now,
                    );
                }
            }
            return ReconcileOutcome::Terminal;
        };
        let Some(job) = state.jobs.get_mut(&job_id) else {
            ts.phase = Phase::Idle;
            return ReconcileOutcome::Unknown;
        };

        match result {
            Ok(()) => {
                job.transition(JobStatus::Dispatched, None, now);
                ts.phase = Phase::InFlight { job_id };
                ts.failures = 0;
                info!(job_id = %job_id, "Release job in flight");
                ReconcileOutcome::Dispatched(job_id)
            }
            Err(DispatchError::Cancelled) => {
                ts.phase = Phase::Idle;
                ts.pending = true;
                ReconcileOutcome::Interrupted
            }
            Err(e) if e.is_transient() => {
                ts.failures += 1;
                match self.retry.delay_for(ts.failures) {
                    Some(delay) => {
                        let until = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                        warn!(job_id = %job_id, failures = ts.failures, until = %until, "Dispatch backing off");
                        ts.phase = Phase::Waiting {
                            wait: Wait::Backoff { until, job_id },
                        };
                        ReconcileOutcome::BackingOff(until)
                    }
                    None => {
                        let message = format!("gave up after {} attempts: {e}", ts.failures);
                        warn!(job_id = %job_id, "{message}");
                        self.fail_job(job, JobStatus::Failed, message, now);
                        ts.phase = Phase::Idle;
                        ts.failures = 0;
                        ReconcileOutcome::Failed(job_id)
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Release job failed");
                self.fail_job(job, JobStatus::Failed, e.to_string(), now);
                ts.phase = Phase::Idle;
                ts.failures = 0;
                ReconcileOutcome::Failed(job_id)
            }
        }
    }

    /// Leave `Evaluating` for `phase` unless the target changed meanwhile
    fn settle(
        &self,
        target: &ReleaseTarget,
        phase: Phase,
        decision: Option<PolicyDecision>,
        outcome: ReconcileOutcome,
    ) -> ReconcileOutcome {
        let settled = self.with_evaluating(target, |ts| {
            ts.phase = phase;
            if decision.is_some() {
                ts.last_decision = decision;
            }
        });
        if settled {
            outcome
        } else {
            ReconcileOutcome::Terminal
        }
    }

    fn with_evaluating(&self, target: &ReleaseTarget, f: impl FnOnce(&mut TargetState)) -> bool {
        let mut state = self.state.lock();
        match state.targets.get_mut(target) {
            Some(ts) if ts.phase == Phase::Evaluating => {
                f(ts);
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    /// Targets a batch of store notifications may affect; `None` means all
    pub fn affected_by(&self, batch: &NotificationBatch) -> Option<BTreeSet<ReleaseTarget>> {
        if batch.resync {
            return None;
        }
        let targets = self.live_targets();
        let mut affected = BTreeSet::new();
        for n in &batch.notifications {
            match n.kind {
                EntityKind::Resource => affected.extend(
                    targets
                        .iter()
                        .filter(|t| t.resource_id.as_str() == n.id)
                        .cloned(),
                ),
                EntityKind::Deployment => affected.extend(
                    targets
                        .iter()
                        .filter(|t| t.deployment_id.as_str() == n.id)
                        .cloned(),
                ),
                EntityKind::Environment => affected.extend(
                    targets
                        .iter()
                        .filter(|t| t.environment_id.as_str() == n.id)
                        .cloned(),
                ),
                EntityKind::DeploymentVersion => {
                    let version = self.store.deployment_versions().get(&VersionId::new(n.id.clone()))?;
                    affected.extend(
                        targets
                            .iter()
                            .filter(|t| t.deployment_id == version.deployment_id)
                            .cloned(),
                    );
                }
                EntityKind::ReleaseTarget
                | EntityKind::Policy
                | EntityKind::PolicyBypass
                | EntityKind::PolicySkip
                | EntityKind::Approval
                | EntityKind::JobAgent => return None,
                EntityKind::Job => {
                    let target = n
                        .id
                        .parse::<JobId>()
                        .ok()
                        .and_then(|id| self.job(&id))
                        .and_then(|job| job.release_target().cloned());
                    affected.extend(target);
                }
                EntityKind::System
                | EntityKind::GithubEntity
                | EntityKind::WorkflowTemplate
                | EntityKind::Workflow => {}
            }
        }
        Some(affected)
    }

    /// Earliest instant a waiting target asked to be looked at again
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .targets
            .values()
            .filter_map(TargetState::wake_at)
            .min()
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// Tracked targets that are not terminal
    pub fn live_targets(&self) -> Vec<ReleaseTarget> {
        self.state
            .lock()
            .targets
            .iter()
            .filter(|(_, ts)| ts.phase != Phase::Terminal)
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn target_state(&self, target: &ReleaseTarget) -> Option<TargetState> {
        self.state.lock().targets.get(target).cloned()
    }

    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.state.lock().jobs.get(job_id).cloned()
    }

    /// Every job, in id order
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.values().cloned().collect()
    }

    /// Results currently held for jobs not created yet
    pub fn early_result_count(&self) -> usize {
        self.state.lock().early_results.len()
    }

    pub fn jobs_for(&self, target: &ReleaseTarget) -> Vec<Job> {
        self.state
            .lock()
            .jobs
            .values()
            .filter(|j| j.release_target() == Some(target))
            .cloned()
            .collect()
    }

    /// Jobs of a target that are pending or dispatched
    pub fn active_jobs_for(&self, target: &ReleaseTarget) -> Vec<Job> {
        self.jobs_for(target)
            .into_iter()
            .filter(|j| j.status.is_active())
            .collect()
    }
}

/// Cancel every active job of `target` except `keep`; returns the result
/// events to announce
fn cancel_active_jobs(
    jobs: &mut BTreeMap<JobId, Job>,
    target: &ReleaseTarget,
    keep: Option<JobId>,
    reason: &str,
    at: DateTime<Utc>,
) -> Vec<JobUpdate> {
    let mut cancelled = Vec::new();
    for job in jobs.values_mut() {
        if Some(job.id) != keep && job.status.is_active() && job.release_target() == Some(target) {
            info!(job_id = %job.id, release_target = %target, reason, "Job cancelled");
            job.transition(JobStatus::Cancelled, Some(reason.to_string()), at);
            cancelled.push(JobUpdate {
                job_id: job.id,
                status: JobStatus::Cancelled,
                message: Some(reason.to_string()),
            });
        }
    }
    cancelled
}

/// Shallow-merge `overrides` over the agent's own config
fn merge_config(base: &serde_json::Value, overrides: &serde_json::Value) -> serde_json::Value {
    match (base, overrides) {
        (_, serde_json::Value::Null) => base.clone(),
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (k, v) in overrides {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, overrides) => overrides.clone(),
    }
}
