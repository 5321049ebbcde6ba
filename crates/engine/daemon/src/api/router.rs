//! API router configuration

use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the read API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/workspaces", get(handlers::list_workspaces))
        .route("/workspaces/:id/systems", get(handlers::list_systems))
        .route("/workspaces/:id/deployments", get(handlers::list_deployments))
        .route("/workspaces/:id/environments", get(handlers::list_environments))
        .route("/workspaces/:id/release-targets", get(handlers::list_release_targets))
        .route("/workspaces/:id/job-agents", get(handlers::list_job_agents))
        .route(
            "/workspaces/:id/job-agents/:agent_id",
            get(handlers::get_job_agent),
        )
        .route(
            "/workspaces/:id/github-entities/by-installation/:installation_id",
            get(handlers::get_github_entity),
        )
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };
    router.with_state(state)
}
