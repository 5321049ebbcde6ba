//! Log consumer
//!
//! Runs one [`PartitionWorker`] per assigned partition. A halted partition
//! stops on its own; the others keep consuming until shutdown.

use engine_types::Shutdown;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::dead_letter::DeadLetterQueue;
use crate::error::{EngineError, Result};
use crate::health::HealthBoard;
use crate::log::PartitionedLog;
use crate::progress::{PartitionKey, ProgressStore};
use crate::registry::Registry;
use crate::worker::{DrainStats, PartitionWorker, WorkerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub topic: String,

    /// Partitions assigned to this process
    pub partitions: Vec<u32>,

    pub worker: WorkerConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "workspace-events".to_string(),
            partitions: (0..4).collect(),
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct Consumer {
    config: ConsumerConfig,
    log: Arc<dyn PartitionedLog>,
    progress: Arc<dyn ProgressStore>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    registry: Arc<Registry>,
    health: Arc<HealthBoard>,
}

impl Consumer {
    pub fn new(
        config: ConsumerConfig,
        log: Arc<dyn PartitionedLog>,
        progress: Arc<dyn ProgressStore>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            config,
            log,
            progress,
            dead_letters,
            registry,
            health: Arc::new(HealthBoard::new()),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<HealthBoard> {
        &self.health
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn worker(&self, partition: u32) -> PartitionWorker {
        PartitionWorker::new(
            PartitionKey::new(self.config.topic.clone(), partition),
            Arc::clone(&self.log),
            Arc::clone(&self.progress),
            Arc::clone(&self.dead_letters),
            Arc::clone(&self.registry),
            Arc::clone(&self.health),
            self.config.worker.clone(),
        )
    }

    /// Apply everything currently in every assigned partition
    pub async fn drain(&self) -> Result<DrainStats> {
        let mut total = DrainStats::default();
        for &partition in &self.config.partitions {
            total.merge(self.worker(partition).drain().await?);
        }
        Ok(total)
    }

    /// Consume every assigned partition until `shutdown` fires
    ///
    /// Returns the first halt once every worker has stopped.
    pub async fn run(&self, shutdown: Shutdown) -> Result<DrainStats> {
        info!(
            topic = %self.config.topic,
            partitions = ?self.config.partitions,
            "Consumer started"
        );
        let workers = self
            .config
            .partitions
            .iter()
            .map(|&partition| tokio::spawn(self.worker(partition).run(shutdown.clone())))
            .collect::<Vec<_>>();

        let mut total = DrainStats::default();
        let mut first_error = None;
        for joined in join_all(workers).await {
            let result = joined.map_err(|e| EngineError::Task(e.to_string())).and_then(|r| r);
            match result {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    error!(error = %e, "Partition worker failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}
