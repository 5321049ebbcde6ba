//! Application state for API handlers

use chrono::{DateTime, Utc};
use engine_core::{HealthBoard, Registry};
use std::sync::Arc;

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,

    /// Partition health reported by the consumer
    pub health: Arc<HealthBoard>,

    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, health: Arc<HealthBoard>) -> Self {
        Self {
            registry,
            health,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }
}
