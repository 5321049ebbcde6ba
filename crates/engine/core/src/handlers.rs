//! Typed event handlers
//!
//! Each handler decodes its payload and applies it to one workspace. Store
//! mutations validate before writing, so a handler that fails leaves the
//! store untouched.

use engine_store::{ChangeSet, ChangeType};
use engine_types::{
    ApprovalRecord, BypassId, Deployment, DeploymentId, DeploymentVersion, EntityKind, EntityRef,
    Environment, EnvironmentId, GithubEntity, JobAgent, JobAgentId, JobUpdate, Policy,
    PolicyBypass, PolicyId, PolicySkip, RawEvent, ReleaseTarget, Resource, ResourceId, SkipId,
    System, SystemId, Workflow, WorkflowTemplate,
};
use tracing::debug;

use crate::error::HandlerError;
use crate::workspace::Workspace;

type HandlerResult = Result<(), HandlerError>;

fn entity_ref(event: &RawEvent) -> Result<String, HandlerError> {
    let EntityRef { id } = event.decode()?;
    if id.is_empty() {
        return Err(HandlerError::Validation(format!(
            "{} payload has an empty id",
            event.event_type
        )));
    }
    Ok(id)
}

pub(crate) fn upsert_resource(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let mut resource: Resource = event.decode()?;
    if resource.workspace_id.is_none() {
        resource.workspace_id = Some(ws.id());
    }
    ws.store().upsert_resource(cs, resource)?;
    Ok(())
}

pub(crate) fn remove_resource(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_resource(cs, &ResourceId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn upsert_deployment(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let deployment: Deployment = event.decode()?;
    ws.store().upsert_deployment(cs, deployment)?;
    Ok(())
}

pub(crate) fn remove_deployment(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_deployment(cs, &DeploymentId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn upsert_environment(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let environment: Environment = event.decode()?;
    ws.store().upsert_environment(cs, environment)?;
    Ok(())
}

pub(crate) fn remove_environment(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_environment(cs, &EnvironmentId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn upsert_system(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let system: System = event.decode()?;
    ws.store().upsert_system(cs, system)?;
    Ok(())
}

pub(crate) fn remove_system(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_system(cs, &SystemId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn create_deployment_version(
    ws: &Workspace,
    cs: &mut ChangeSet,
    event: &RawEvent,
) -> HandlerResult {
    let version: DeploymentVersion = event.decode()?;
    ws.store().upsert_deployment_version(cs, version)?;
    Ok(())
}

pub(crate) fn upsert_policy(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let policy: Policy = event.decode()?;
    ws.store().upsert_policy(cs, policy)?;
    Ok(())
}

pub(crate) fn remove_policy(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_policy(cs, &PolicyId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn create_bypass(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let bypass: PolicyBypass = event.decode()?;
    ws.store().upsert_policy_bypass(cs, bypass)?;
    Ok(())
}

pub(crate) fn remove_bypass(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_policy_bypass(cs, &BypassId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn create_skip(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let skip: PolicySkip = event.decode()?;
    ws.store().upsert_policy_skip(cs, skip)?;
    Ok(())
}

pub(crate) fn remove_skip(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_policy_skip(cs, &SkipId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn create_approval(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let approval: ApprovalRecord = event.decode()?;
    ws.store().upsert_approval(cs, approval)?;
    Ok(())
}

pub(crate) fn upsert_job_agent(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let agent: JobAgent = event.decode()?;
    ws.store().upsert_job_agent(cs, agent)?;
    Ok(())
}

pub(crate) fn remove_job_agent(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_job_agent(cs, &JobAgentId::new(entity_ref(event)?))?;
    Ok(())
}

pub(crate) fn create_workflow_template(
    ws: &Workspace,
    cs: &mut ChangeSet,
    event: &RawEvent,
) -> HandlerResult {
    let template: WorkflowTemplate = event.decode()?;
    ws.store().upsert_workflow_template(cs, template)?;
    Ok(())
}

/// Instantiate a workflow and queue its job when an agent can run it
pub(crate) fn create_workflow(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let workflow: Workflow = event.decode()?;
    let (workflow, template) = ws.store().create_workflow(cs, workflow)?;
    if ws.manager().submit_workflow(&workflow, &template).is_none() {
        debug!(workflow_id = %workflow.id, "Workflow stored without a job");
    }
    Ok(())
}

pub(crate) fn create_github_entity(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let entity: GithubEntity = event.decode()?;
    ws.store().upsert_github_entity(cs, entity)?;
    Ok(())
}

/// Deletes carry the slug as the id
pub(crate) fn remove_github_entity(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    ws.store().remove_github_entity(cs, &entity_ref(event)?)?;
    Ok(())
}

/// Record an agent's job result and wake the job's target
pub(crate) fn update_job(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let update: JobUpdate = event.decode()?;
    let data = serde_json::to_value(&update).map_err(|e| HandlerError::State(e.to_string()))?;
    let freed = ws.manager().apply_job_update(&update, event.timestamp);
    cs.record(EntityKind::Job, ChangeType::Update, update.job_id, data);
    if freed.is_some() {
        ws.notifier()
            .publish(EntityKind::Job, update.job_id.to_string(), ChangeType::Update);
    }
    Ok(())
}

/// Force the target's deployed version back through the pipeline
pub(crate) fn redeploy(ws: &Workspace, cs: &mut ChangeSet, event: &RawEvent) -> HandlerResult {
    let target: ReleaseTarget = event.decode()?;
    let generation = ws.store().redeploy_release_target(cs, &target)?;
    ws.manager().request_redeploy(&target)?;
    debug!(release_target = %target, generation, "Redeploy recorded");
    Ok(())
}

pub(crate) fn save(ws: &Workspace, event: &RawEvent) -> HandlerResult {
    ws.save_snapshot(event.timestamp)?;
    Ok(())
}
