//! Per-workspace read handlers

use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use engine_core::Workspace;
use engine_release::TargetState;
use engine_types::{
    Deployment, Environment, GithubEntity, JobAgent, JobAgentId, ReleaseTarget, System,
    WorkspaceId,
};
use serde::Serialize;
use std::sync::Arc;

fn workspace(state: &AppState, id: &str) -> ApiResult<Arc<Workspace>> {
    let workspace_id: WorkspaceId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid workspace id {}: {}", id, e)))?;
    state
        .registry
        .get(&workspace_id)
        .ok_or_else(|| ApiError::NotFound(format!("Workspace {} not found", id)))
}

/// List known workspace ids
pub async fn list_workspaces(State(state): State<AppState>) -> Json<Vec<WorkspaceId>> {
    Json(state.registry.ids())
}

pub async fn list_systems(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<System>>> {
    Ok(Json(workspace(&state, &id)?.store().systems().values()))
}

pub async fn list_deployments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Deployment>>> {
    Ok(Json(workspace(&state, &id)?.store().deployments().values()))
}

pub async fn list_environments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Environment>>> {
    Ok(Json(workspace(&state, &id)?.store().environments().values()))
}

/// Release target with its reconciliation state, if reconciled yet
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseTargetView {
    #[serde(flatten)]
    pub release_target: ReleaseTarget,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TargetState>,
}

pub async fn list_release_targets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ReleaseTargetView>>> {
    let workspace = workspace(&state, &id)?;
    let manager = workspace.manager();
    let views = workspace
        .store()
        .release_targets()
        .into_iter()
        .map(|target| ReleaseTargetView {
            state: manager.target_state(&target),
            release_target: target,
        })
        .collect();
    Ok(Json(views))
}

pub async fn list_job_agents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<JobAgent>>> {
    Ok(Json(workspace(&state, &id)?.store().job_agents().values()))
}

pub async fn get_job_agent(
    State(state): State<AppState>,
    Path((id, agent_id)): Path<(String, String)>,
) -> ApiResult<Json<JobAgent>> {
    workspace(&state, &id)?
        .store()
        .job_agents()
        .get(&JobAgentId::new(agent_id.as_str()))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job agent {} not found", agent_id)))
}

pub async fn get_github_entity(
    State(state): State<AppState>,
    Path((id, installation_id)): Path<(String, String)>,
) -> ApiResult<Json<GithubEntity>> {
    let installation: i64 = installation_id.parse().map_err(|_| {
        ApiError::BadRequest(format!("Invalid installation id {}", installation_id))
    })?;
    workspace(&state, &id)?
        .store()
        .github_entity_by_installation(installation)
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "GitHub entity for installation {} not found",
                installation
            ))
        })
}
