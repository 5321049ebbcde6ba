//! The entity store
//!
//! Owns every typed collection of one workspace plus the derived selector
//! index and release-target set. Mutations follow a fixed sequence:
//! validate, write the collection, update the index, re-derive release
//! targets, then record the change and notify. Nothing is written before
//! validation passes, so a rejected mutation leaves no partial state.
//!
//! Lock order is collection < index < release targets; a collection lock is
//! never requested while the index or release-target lock is held.

use crate::changes::{ChangeSet, ChangeType};
use crate::collection::{Collection, Upserted};
use crate::error::{Result, StoreError};
use crate::index::{PolicyTargetKey, SelectorIndex};
use crate::notify::ChangeNotifier;
use crate::release_targets::{
    derive_all, derive_for_resource, ReleaseTargetSet, TargetDiff, TargetGeneration,
};
use crate::snapshot::WorkspaceSnapshot;
use chrono::{DateTime, Utc};
use engine_types::{
    ApprovalId, ApprovalRecord, BypassId, Deployment, DeploymentId, DeploymentVersion,
    EntityKind, Environment, EnvironmentId, GithubEntity, JobAgent, JobAgentId, Policy, PolicyBypass,
    PolicyId, PolicySkip, ReleaseTarget, Resource, ResourceId, SkipId, System, SystemId, VersionId,
    Workflow, WorkflowId, WorkflowTemplate, WorkflowTemplateId, WorkspaceId,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;
use tracing::debug;

/// Typed collections plus derived state for one workspace
#[derive(Debug)]
pub struct EntityStore {
    resources: Collection<ResourceId, Resource>,
    deployments: Collection<DeploymentId, Deployment>,
    environments: Collection<EnvironmentId, Environment>,
    systems: Collection<SystemId, System>,
    versions: Collection<VersionId, DeploymentVersion>,
    policies: Collection<PolicyId, Policy>,
    bypasses: Collection<BypassId, PolicyBypass>,
    skips: Collection<SkipId, PolicySkip>,
    approvals: Collection<ApprovalId, ApprovalRecord>,
    job_agents: Collection<JobAgentId, JobAgent>,
    workflow_templates: Collection<WorkflowTemplateId, WorkflowTemplate>,
    workflows: Collection<WorkflowId, Workflow>,
    github_entities: Collection<String, GithubEntity>,
    index: RwLock<SelectorIndex>,
    release_targets: RwLock<ReleaseTargetSet>,
    notifier: Arc<ChangeNotifier>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new(Arc::new(ChangeNotifier::default()))
    }
}

impl EntityStore {
    pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            resources: Collection::new(),
            deployments: Collection::new(),
            environments: Collection::new(),
            systems: Collection::new(),
            versions: Collection::new(),
            policies: Collection::new(),
            bypasses: Collection::new(),
            skips: Collection::new(),
            approvals: Collection::new(),
            job_agents: Collection::new(),
            workflow_templates: Collection::new(),
            workflows: Collection::new(),
            github_entities: Collection::new(),
            index: RwLock::new(SelectorIndex::new()),
            release_targets: RwLock::new(ReleaseTargetSet::new()),
            notifier,
        }
    }

    pub fn notifier(&self) -> Arc<ChangeNotifier> {
        Arc::clone(&self.notifier)
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn resources(&self) -> &Collection<ResourceId, Resource> {
        &self.resources
    }

    pub fn deployments(&self) -> &Collection<DeploymentId, Deployment> {
        &self.deployments
    }

    pub fn environments(&self) -> &Collection<EnvironmentId, Environment> {
        &self.environments
    }

    pub fn systems(&self) -> &Collection<SystemId, System> {
        &self.systems
    }

    pub fn deployment_versions(&self) -> &Collection<VersionId, DeploymentVersion> {
        &self.versions
    }

    pub fn policies(&self) -> &Collection<PolicyId, Policy> {
        &self.policies
    }

    pub fn policy_bypasses(&self) -> &Collection<BypassId, PolicyBypass> {
        &self.bypasses
    }

    pub fn policy_skips(&self) -> &Collection<SkipId, PolicySkip> {
        &self.skips
    }

    pub fn approvals(&self) -> &Collection<ApprovalId, ApprovalRecord> {
        &self.approvals
    }

    pub fn job_agents(&self) -> &Collection<JobAgentId, JobAgent> {
        &self.job_agents
    }

    pub fn workflow_templates(&self) -> &Collection<WorkflowTemplateId, WorkflowTemplate> {
        &self.workflow_templates
    }

    pub fn workflows(&self) -> &Collection<WorkflowId, Workflow> {
        &self.workflows
    }

    pub fn github_entities(&self) -> &Collection<String, GithubEntity> {
        &self.github_entities
    }

    pub fn github_entity_by_installation(&self, installation_id: i64) -> Option<GithubEntity> {
        self.github_entities
            .find(|g| g.installation_id == installation_id)
    }

    pub fn release_targets(&self) -> BTreeSet<ReleaseTarget> {
        self.release_targets.read().all()
    }

    pub fn has_release_target(&self, target: &ReleaseTarget) -> bool {
        self.release_targets.read().contains(target)
    }

    pub fn release_target_generation(&self, target: &ReleaseTarget) -> Option<TargetGeneration> {
        self.release_targets.read().generation(target)
    }

    /// Every live target with its counters, read under one lock
    pub fn release_target_generations(&self) -> BTreeMap<ReleaseTarget, TargetGeneration> {
        let set = self.release_targets.read();
        set.all()
            .into_iter()
            .map(|t| {
                let g = set.generation(&t).unwrap_or_default();
                (t, g)
            })
            .collect()
    }

    /// Advance a live target's generation for a redeploy command
    pub fn redeploy_release_target(&self, cs: &mut ChangeSet, target: &ReleaseTarget) -> Result<u64> {
        let generation = self
            .release_targets
            .write()
            .bump_generation(target)
            .ok_or_else(|| StoreError::not_found(EntityKind::ReleaseTarget, target))?;
        self.record(
            cs,
            EntityKind::ReleaseTarget,
            ChangeType::Update,
            target,
            &serde_json::json!({ "generation": generation }),
        )?;
        Ok(generation)
    }

    pub fn release_targets_for_deployment(&self, deployment_id: &DeploymentId) -> Vec<ReleaseTarget> {
        self.release_targets.read().for_deployment(deployment_id)
    }

    /// Versions of the target's deployment, newest first
    ///
    /// Ties on `created_at` break by descending id so the order is total.
    pub fn candidate_versions(&self, deployment_id: &DeploymentId) -> Vec<DeploymentVersion> {
        let mut versions = self.versions.filter(|v| v.deployment_id == *deployment_id);
        versions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        versions
    }

    /// Enabled policies with a target matching all three sides, in id order
    pub fn applicable_policies(&self, target: &ReleaseTarget) -> Vec<Policy> {
        let ids = self.index.read().applicable_policies(
            &target.deployment_id,
            &target.environment_id,
            &target.resource_id,
        );
        ids.iter()
            .filter_map(|id| self.policies.get(id))
            .filter(|p| p.enabled)
            .collect()
    }

    pub fn bypasses_for(&self, target: &ReleaseTarget) -> Vec<PolicyBypass> {
        self.bypasses.filter(|b| b.scope.covers(target))
    }

    pub fn skips_for(&self, target: &ReleaseTarget) -> Vec<PolicySkip> {
        self.skips.filter(|s| s.scope.covers(target))
    }

    /// Distinct approvers of a version for one environment
    pub fn approvers(&self, version_id: &VersionId, environment_id: &EnvironmentId) -> BTreeSet<String> {
        self.approvals.with_read(|approvals| {
            approvals
                .values()
                .filter(|a| a.version_id == *version_id && a.environment_id == *environment_id)
                .map(|a| a.approver.clone())
                .collect()
        })
    }

    // ------------------------------------------------------------------
    // Resources, deployments, environments (indexed)
    // ------------------------------------------------------------------

    pub fn upsert_resource(&self, cs: &mut ChangeSet, resource: Resource) -> Result<()> {
        resource.validate()?;
        let id = resource.id.clone();
        let outcome = self.resources.upsert(id.clone(), resource.clone());
        if !self.record_upsert(cs, EntityKind::Resource, &id, &resource, &outcome)? {
            return Ok(());
        }
        {
            let mut index = self.index.write();
            index.deployment_resources.upsert_entity(&id, &resource);
            index.environment_resources.upsert_entity(&id, &resource);
            index.policy_resources.upsert_entity(&id, &resource);
        }
        self.rederive(cs, [id])
    }

    pub fn remove_resource(&self, cs: &mut ChangeSet, id: &ResourceId) -> Result<Option<Resource>> {
        let Some(previous) = self.resources.remove(id) else {
            return Ok(None);
        };
        self.record(cs, EntityKind::Resource, ChangeType::Delete, id, &previous)?;
        {
            let mut index = self.index.write();
            index.deployment_resources.remove_entity(id);
            index.environment_resources.remove_entity(id);
            index.policy_resources.remove_entity(id);
        }
        self.rederive(cs, [id.clone()])?;
        Ok(Some(previous))
    }

    pub fn upsert_deployment(&self, cs: &mut ChangeSet, deployment: Deployment) -> Result<()> {
        deployment.validate()?;
        let id = deployment.id.clone();
        let outcome = self.deployments.upsert(id.clone(), deployment.clone());
        if !self.record_upsert(cs, EntityKind::Deployment, &id, &deployment, &outcome)? {
            return Ok(());
        }
        let affected = self.resources.with_read(|resources| {
            let mut index = self.index.write();
            let mut affected = index.deployment_resources.matches_of(&id);
            index.deployment_resources.upsert_selector(
                id.clone(),
                deployment.resource_selector.clone(),
                resources.iter(),
            );
            index.policy_deployments.upsert_entity(&id, &deployment);
            affected.extend(index.deployment_resources.matches_of(&id));
            affected
        });
        self.rederive(cs, affected)
    }

    pub fn remove_deployment(&self, cs: &mut ChangeSet, id: &DeploymentId) -> Result<Option<Deployment>> {
        let Some(previous) = self.deployments.remove(id) else {
            return Ok(None);
        };
        self.record(cs, EntityKind::Deployment, ChangeType::Delete, id, &previous)?;
        let affected = {
            let mut index = self.index.write();
            index.policy_deployments.remove_entity(id);
            index.deployment_resources.remove_selector(id)
        };
        self.rederive(cs, affected)?;
        Ok(Some(previous))
    }

    pub fn upsert_environment(&self, cs: &mut ChangeSet, environment: Environment) -> Result<()> {
        environment.validate()?;
        let id = environment.id.clone();
        let outcome = self.environments.upsert(id.clone(), environment.clone());
        if !self.record_upsert(cs, EntityKind::Environment, &id, &environment, &outcome)? {
            return Ok(());
        }
        let affected = self.resources.with_read(|resources| {
            let mut index = self.index.write();
            let mut affected = index.environment_resources.matches_of(&id);
            index.environment_resources.upsert_selector(
                id.clone(),
                environment.resource_selector.clone(),
                resources.iter(),
            );
            index.policy_environments.upsert_entity(&id, &environment);
            affected.extend(index.environment_resources.matches_of(&id));
            affected
        });
        self.rederive(cs, affected)
    }

    pub fn remove_environment(
        &self,
        cs: &mut ChangeSet,
        id: &EnvironmentId,
    ) -> Result<Option<Environment>> {
        let Some(previous) = self.environments.remove(id) else {
            return Ok(None);
        };
        self.record(cs, EntityKind::Environment, ChangeType::Delete, id, &previous)?;
        let affected = {
            let mut index = self.index.write();
            index.policy_environments.remove_entity(id);
            index.environment_resources.remove_selector(id)
        };
        self.rederive(cs, affected)?;
        Ok(Some(previous))
    }

    /// Recompute the release targets of each resource and record the delta
    fn rederive(&self, cs: &mut ChangeSet, resource_ids: impl IntoIterator<Item = ResourceId>) -> Result<()> {
        let resource_ids: Vec<(ResourceId, bool)> = resource_ids
            .into_iter()
            .map(|id| {
                let exists = self.resources.contains(&id);
                (id, exists)
            })
            .collect();
        if resource_ids.is_empty() {
            return Ok(());
        }

        let diff = self.deployments.with_read(|deployments| {
            self.environments.with_read(|environments| {
                let index = self.index.read();
                let mut targets = self.release_targets.write();
                let mut diff = TargetDiff::default();
                for (resource_id, exists) in &resource_ids {
                    let next = if *exists {
                        derive_for_resource(resource_id, &index, deployments, environments)
                    } else {
                        BTreeSet::new()
                    };
                    diff.extend(targets.replace_for_resource(resource_id, next));
                }
                diff
            })
        });

        for target in &diff.destroyed {
            debug!(release_target = %target, "Release target destroyed");
            self.record(cs, EntityKind::ReleaseTarget, ChangeType::Delete, target, target)?;
        }
        for target in &diff.created {
            debug!(release_target = %target, "Release target created");
            self.record(cs, EntityKind::ReleaseTarget, ChangeType::Insert, target, target)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Policies (indexed by target selectors)
    // ------------------------------------------------------------------

    pub fn upsert_policy(&self, cs: &mut ChangeSet, policy: Policy) -> Result<()> {
        policy.validate()?;
        let id = policy.id.clone();
        let outcome = self.policies.upsert(id.clone(), policy.clone());
        if !self.record_upsert(cs, EntityKind::Policy, &id, &policy, &outcome)? {
            return Ok(());
        }

        self.resources.with_read(|resources| {
            self.deployments.with_read(|deployments| {
                self.environments.with_read(|environments| {
                    let mut index = self.index.write();
                    if let Upserted::Updated(previous) = &outcome {
                        Self::unindex_policy(&mut index, previous);
                    }
                    for target in &policy.targets {
                        let key = PolicyTargetKey {
                            policy_id: id.clone(),
                            target_id: target.id.clone(),
                        };
                        index.policy_resources.upsert_selector(
                            key.clone(),
                            target.resource_selector.clone(),
                            resources.iter(),
                        );
                        index.policy_deployments.upsert_selector(
                            key.clone(),
                            target.deployment_selector.clone(),
                            deployments.iter(),
                        );
                        index.policy_environments.upsert_selector(
                            key,
                            target.environment_selector.clone(),
                            environments.iter(),
                        );
                    }
                })
            })
        });
        Ok(())
    }

    pub fn remove_policy(&self, cs: &mut ChangeSet, id: &PolicyId) -> Result<Option<Policy>> {
        let Some(previous) = self.policies.remove(id) else {
            return Ok(None);
        };
        self.record(cs, EntityKind::Policy, ChangeType::Delete, id, &previous)?;
        Self::unindex_policy(&mut self.index.write(), &previous);
        Ok(Some(previous))
    }

    fn unindex_policy(index: &mut SelectorIndex, policy: &Policy) {
        for target in &policy.targets {
            let key = PolicyTargetKey {
                policy_id: policy.id.clone(),
                target_id: target.id.clone(),
            };
            index.policy_resources.remove_selector(&key);
            index.policy_deployments.remove_selector(&key);
            index.policy_environments.remove_selector(&key);
        }
    }

    // ------------------------------------------------------------------
    // Plain collections
    // ------------------------------------------------------------------

    pub fn upsert_system(&self, cs: &mut ChangeSet, system: System) -> Result<()> {
        require_id(EntityKind::System, system.id.as_str())?;
        self.upsert_plain(cs, &self.systems, EntityKind::System, system.id.clone(), system)
    }

    pub fn remove_system(&self, cs: &mut ChangeSet, id: &SystemId) -> Result<Option<System>> {
        self.remove_plain(cs, &self.systems, EntityKind::System, id)
    }

    pub fn upsert_deployment_version(&self, cs: &mut ChangeSet, version: DeploymentVersion) -> Result<()> {
        require_id(EntityKind::DeploymentVersion, version.id.as_str())?;
        require_id(EntityKind::Deployment, version.deployment_id.as_str())?;
        self.upsert_plain(
            cs,
            &self.versions,
            EntityKind::DeploymentVersion,
            version.id.clone(),
            version,
        )
    }

    pub fn upsert_policy_bypass(&self, cs: &mut ChangeSet, bypass: PolicyBypass) -> Result<()> {
        require_id(EntityKind::PolicyBypass, bypass.id.as_str())?;
        if bypass.window.end.is_some_and(|end| end <= bypass.window.start) {
            return Err(StoreError::Validation(format!(
                "bypass {} window ends before it starts",
                bypass.id
            )));
        }
        self.upsert_plain(cs, &self.bypasses, EntityKind::PolicyBypass, bypass.id.clone(), bypass)
    }

    pub fn remove_policy_bypass(&self, cs: &mut ChangeSet, id: &BypassId) -> Result<Option<PolicyBypass>> {
        self.remove_plain(cs, &self.bypasses, EntityKind::PolicyBypass, id)
    }

    pub fn upsert_policy_skip(&self, cs: &mut ChangeSet, skip: PolicySkip) -> Result<()> {
        require_id(EntityKind::PolicySkip, skip.id.as_str())?;
        self.upsert_plain(cs, &self.skips, EntityKind::PolicySkip, skip.id.clone(), skip)
    }

    pub fn remove_policy_skip(&self, cs: &mut ChangeSet, id: &SkipId) -> Result<Option<PolicySkip>> {
        self.remove_plain(cs, &self.skips, EntityKind::PolicySkip, id)
    }

    pub fn upsert_approval(&self, cs: &mut ChangeSet, approval: ApprovalRecord) -> Result<()> {
        require_id(EntityKind::Approval, approval.id.as_str())?;
        if approval.approver.is_empty() {
            return Err(StoreError::Validation(format!(
                "approval {} has no approver",
                approval.id
            )));
        }
        self.upsert_plain(cs, &self.approvals, EntityKind::Approval, approval.id.clone(), approval)
    }

    pub fn upsert_job_agent(&self, cs: &mut ChangeSet, agent: JobAgent) -> Result<()> {
        require_id(EntityKind::JobAgent, agent.id.as_str())?;
        if agent.kind.is_empty() {
            return Err(StoreError::Validation(format!("job agent {} has no type", agent.id)));
        }
        self.upsert_plain(cs, &self.job_agents, EntityKind::JobAgent, agent.id.clone(), agent)
    }

    pub fn remove_job_agent(&self, cs: &mut ChangeSet, id: &JobAgentId) -> Result<Option<JobAgent>> {
        self.remove_plain(cs, &self.job_agents, EntityKind::JobAgent, id)
    }

    pub fn upsert_workflow_template(&self, cs: &mut ChangeSet, template: WorkflowTemplate) -> Result<()> {
        require_id(EntityKind::WorkflowTemplate, template.id.as_str())?;
        self.upsert_plain(
            cs,
            &self.workflow_templates,
            EntityKind::WorkflowTemplate,
            template.id.clone(),
            template,
        )
    }

    /// Instantiate a workflow from its template
    ///
    /// The stored workflow carries the resolved inputs (instantiation inputs
    /// over template defaults). Fails validation when the template is unknown
    /// or a required input is missing.
    pub fn create_workflow(&self, cs: &mut ChangeSet, workflow: Workflow) -> Result<(Workflow, WorkflowTemplate)> {
        require_id(EntityKind::Workflow, workflow.id.as_str())?;
        let template = self
            .workflow_templates
            .get(&workflow.workflow_template_id)
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "workflow {} references unknown template {}",
                    workflow.id, workflow.workflow_template_id
                ))
            })?;
        let inputs = template.resolve_inputs(&workflow.inputs)?;
        let resolved = Workflow { inputs, ..workflow };
        self.upsert_plain(
            cs,
            &self.workflows,
            EntityKind::Workflow,
            resolved.id.clone(),
            resolved.clone(),
        )?;
        Ok((resolved, template))
    }

    pub fn upsert_github_entity(&self, cs: &mut ChangeSet, entity: GithubEntity) -> Result<()> {
        require_id(EntityKind::GithubEntity, &entity.slug)?;
        self.upsert_plain(
            cs,
            &self.github_entities,
            EntityKind::GithubEntity,
            entity.slug.clone(),
            entity,
        )
    }

    pub fn remove_github_entity(&self, cs: &mut ChangeSet, slug: &str) -> Result<Option<GithubEntity>> {
        self.remove_plain(cs, &self.github_entities, EntityKind::GithubEntity, &slug.to_string())
    }

    fn upsert_plain<K, V>(
        &self,
        cs: &mut ChangeSet,
        collection: &Collection<K, V>,
        kind: EntityKind,
        key: K,
        value: V,
    ) -> Result<()>
    where
        K: Ord + Clone + Display,
        V: Clone + PartialEq + Serialize,
    {
        let outcome = collection.upsert(key.clone(), value.clone());
        self.record_upsert(cs, kind, &key, &value, &outcome)?;
        Ok(())
    }

    fn remove_plain<K, V>(
        &self,
        cs: &mut ChangeSet,
        collection: &Collection<K, V>,
        kind: EntityKind,
        key: &K,
    ) -> Result<Option<V>>
    where
        K: Ord + Clone + Display,
        V: Clone + PartialEq + Serialize,
    {
        let Some(previous) = collection.remove(key) else {
            return Ok(None);
        };
        self.record(cs, kind, ChangeType::Delete, key, &previous)?;
        Ok(Some(previous))
    }

    /// Record an upsert; returns false when nothing changed
    fn record_upsert<V: Serialize>(
        &self,
        cs: &mut ChangeSet,
        kind: EntityKind,
        id: &impl Display,
        value: &V,
        outcome: &Upserted<V>,
    ) -> Result<bool> {
        let change_type = match outcome {
            Upserted::Inserted => ChangeType::Insert,
            Upserted::Updated(_) => ChangeType::Update,
            Upserted::Unchanged => return Ok(false),
        };
        self.record(cs, kind, change_type, id, value)?;
        Ok(true)
    }

    fn record(
        &self,
        cs: &mut ChangeSet,
        kind: EntityKind,
        change_type: ChangeType,
        id: &impl Display,
        value: &impl Serialize,
    ) -> Result<()> {
        let id = id.to_string();
        cs.record(kind, change_type, &id, serde_json::to_value(value)?);
        self.notifier.publish(kind, id, change_type);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Whole-store views
    // ------------------------------------------------------------------

    /// Compare the incrementally maintained targets against brute force
    pub fn verify_release_targets(&self) -> Result<()> {
        let expected = self.resources.with_read(|resources| {
            self.deployments.with_read(|deployments| {
                self.environments
                    .with_read(|environments| derive_all(resources, deployments, environments))
            })
        });
        let actual = self.release_targets();
        if expected != actual {
            let missing: Vec<_> = expected.difference(&actual).map(ToString::to_string).collect();
            let extra: Vec<_> = actual.difference(&expected).map(ToString::to_string).collect();
            return Err(StoreError::Invariant(format!(
                "release targets diverged: missing {missing:?}, unexpected {extra:?}"
            )));
        }
        if !self.index.read().is_consistent() {
            return Err(StoreError::Invariant("selector index links are asymmetric".into()));
        }
        Ok(())
    }

    pub fn snapshot(&self, workspace_id: WorkspaceId, taken_at: DateTime<Utc>) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            workspace_id,
            taken_at,
            systems: self.systems.values(),
            resources: self.resources.values(),
            deployments: self.deployments.values(),
            environments: self.environments.values(),
            deployment_versions: self.versions.values(),
            policies: self.policies.values(),
            policy_bypasses: self.bypasses.values(),
            policy_skips: self.skips.values(),
            approvals: self.approvals.values(),
            job_agents: self.job_agents.values(),
            workflow_templates: self.workflow_templates.values(),
            workflows: self.workflows.values(),
            github_entities: self.github_entities.values(),
            release_targets: self.release_targets().into_iter().collect(),
        }
    }
}

fn require_id(kind: EntityKind, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::Validation(format!("{kind} id must not be empty")));
    }
    Ok(())
}
