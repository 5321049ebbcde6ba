//! Health handler

use crate::api::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use engine_core::PartitionHealth;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatus {
    pub topic: String,
    pub partition: u32,
    #[serde(flatten)]
    pub health: PartitionHealth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub workspaces: usize,
    pub partitions: Vec<PartitionStatus>,
}

/// 200 while every partition consumes, 503 once one has halted
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = state.health.is_healthy();
    let partitions = state
        .health
        .snapshot()
        .into_iter()
        .map(|(key, health)| PartitionStatus {
            topic: key.topic,
            partition: key.partition,
            health,
        })
        .collect();

    let (code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: state.version.clone(),
            started_at: state.started_at,
            workspaces: state.registry.len(),
            partitions,
        }),
    )
}
