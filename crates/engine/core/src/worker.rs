//! Partition workers
//!
//! One worker owns one partition and applies its messages strictly in offset
//! order. Per message:
//!
//! - undecodable envelope or payload: logged, skipped, offset advances
//! - validation failure: dead-lettered, offset advances
//! - state error: progress is flushed up to the previous message and the
//!   partition halts
//!
//! Progress is flushed every `flush_every_messages` messages, after
//! `flush_interval` with unflushed messages, whenever the partition is idle,
//! and on shutdown.

use engine_types::{RawEvent, Shutdown};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::error::{EngineError, HandlerError, Result};
use crate::health::{HealthBoard, PartitionHealth};
use crate::log::{LogRecord, PartitionedLog};
use crate::progress::{PartitionKey, Progress, ProgressStore};
use crate::registry::Registry;
use crate::router::EventRouter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub flush_interval: Duration,
    pub flush_every_messages: usize,
    pub fetch_batch_size: usize,

    /// Sleep between reads of an idle partition
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(1000),
            flush_every_messages: 100,
            fetch_batch_size: 256,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Message counts of one worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub applied: usize,
    pub skipped: usize,
    pub dead_lettered: usize,
}

impl DrainStats {
    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.dead_lettered
    }

    pub fn merge(&mut self, other: DrainStats) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.dead_lettered += other.dead_lettered;
    }

    fn record(&mut self, processed: Processed) {
        match processed {
            Processed::Applied => self.applied += 1,
            Processed::Skipped => self.skipped += 1,
            Processed::DeadLettered => self.dead_lettered += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Processed {
    Applied,
    Skipped,
    DeadLettered,
}

#[derive(Debug)]
struct Cursor {
    next: i64,
    applied: Option<Progress>,
    unflushed: usize,
    last_flush: Instant,
}

impl Cursor {
    fn advance(&mut self, record: &LogRecord) {
        self.next = record.offset + 1;
        self.applied = Some(Progress::new(record.offset, record.timestamp));
        self.unflushed += 1;
    }

    fn flush_due(&self, config: &WorkerConfig) -> bool {
        self.unflushed >= config.flush_every_messages
            || (self.unflushed > 0 && self.last_flush.elapsed() >= config.flush_interval)
    }
}

#[derive(Debug)]
pub struct PartitionWorker {
    key: PartitionKey,
    log: Arc<dyn PartitionedLog>,
    progress: Arc<dyn ProgressStore>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    registry: Arc<Registry>,
    health: Arc<HealthBoard>,
    router: EventRouter,
    config: WorkerConfig,
}

impl PartitionWorker {
    pub fn new(
        key: PartitionKey,
        log: Arc<dyn PartitionedLog>,
        progress: Arc<dyn ProgressStore>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        registry: Arc<Registry>,
        health: Arc<HealthBoard>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            key,
            log,
            progress,
            dead_letters,
            registry,
            health,
            router: EventRouter::new(),
            config,
        }
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    async fn resume(&self) -> Result<Cursor> {
        let applied = self.progress.load(&self.key).await?;
        let next = applied.map_or(0, |p| p.resume_offset());
        info!(partition = %self.key, resume_at = next, "Partition resuming");
        Ok(Cursor {
            next,
            applied,
            unflushed: 0,
            last_flush: Instant::now(),
        })
    }

    async fn flush(&self, cursor: &mut Cursor) -> Result<()> {
        if cursor.unflushed == 0 {
            return Ok(());
        }
        if let Some(progress) = cursor.applied {
            self.progress.save(&self.key, progress).await?;
        }
        cursor.unflushed = 0;
        cursor.last_flush = Instant::now();
        Ok(())
    }

    /// Apply one message; an error halts the partition
    async fn process(&self, record: &LogRecord) -> Result<Processed> {
        let event = match RawEvent::from_bytes(record.payload.as_bytes()) {
            Ok(event) => event,
            Err(e) => {
                warn!(partition = %self.key, offset = record.offset, error = %e, "Undecodable message skipped");
                return Ok(Processed::Skipped);
            }
        };
        let workspace = self.registry.get_or_create(event.workspace_id)?;

        match self.router.route(&workspace, &event) {
            Ok(cs) => {
                debug!(
                    partition = %self.key,
                    offset = record.offset,
                    changes = cs.len(),
                    "Message applied"
                );
                Ok(Processed::Applied)
            }
            Err(HandlerError::Decode(reason)) => {
                warn!(partition = %self.key, offset = record.offset, %reason, "Undecodable payload skipped");
                Ok(Processed::Skipped)
            }
            Err(HandlerError::Validation(reason)) => {
                let now = self.registry.services().clock.now();
                let letter = DeadLetter::new(&self.key, record.offset, reason, record.payload.clone(), now);
                self.dead_letters.push(letter).await?;
                Ok(Processed::DeadLettered)
            }
            Err(HandlerError::State(reason)) => Err(EngineError::PartitionHalted {
                topic: self.key.topic.clone(),
                partition: self.key.partition,
                offset: record.offset,
                reason,
            }),
        }
    }

    /// Read and apply one batch; returns the number of messages read
    async fn poll(&self, cursor: &mut Cursor, stats: &mut DrainStats) -> Result<usize> {
        let records = self
            .log
            .read(
                &self.key.topic,
                self.key.partition,
                cursor.next,
                self.config.fetch_batch_size,
            )
            .await?;

        for record in &records {
            let processed = self.process(record).await?;
            stats.record(processed);
            cursor.advance(record);
            if cursor.flush_due(&self.config) {
                self.flush(cursor).await?;
            }
        }
        Ok(records.len())
    }

    /// Record the halt and keep the progress made before it
    async fn fail(&self, cursor: &mut Cursor, err: EngineError) -> EngineError {
        if let Err(flush_err) = self.flush(cursor).await {
            warn!(partition = %self.key, error = %flush_err, "Progress flush failed while halting");
        }
        error!(partition = %self.key, error = %err, "Partition halted");
        self.health.set(
            &self.key,
            PartitionHealth::Halted {
                reason: err.to_string(),
            },
        );
        err
    }

    /// Apply everything currently in the partition, then return
    pub async fn drain(&self) -> Result<DrainStats> {
        let mut cursor = self.resume().await?;
        let mut stats = DrainStats::default();
        loop {
            match self.poll(&mut cursor, &mut stats).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return Err(self.fail(&mut cursor, e).await),
            }
        }
        if let Err(e) = self.flush(&mut cursor).await {
            return Err(self.fail(&mut cursor, e).await);
        }
        Ok(stats)
    }

    /// Consume until `shutdown` fires or the partition halts
    #[instrument(skip(self, shutdown), fields(partition = %self.key))]
    pub async fn run(self, mut shutdown: Shutdown) -> Result<DrainStats> {
        let mut cursor = match self.resume().await {
            Ok(cursor) => cursor,
            Err(e) => {
                self.health.set(&self.key, PartitionHealth::Halted { reason: e.to_string() });
                return Err(e);
            }
        };
        self.health.set(&self.key, PartitionHealth::Running);
        let mut stats = DrainStats::default();

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.poll(&mut cursor, &mut stats).await {
                Ok(0) => {
                    if let Err(e) = self.flush(&mut cursor).await {
                        return Err(self.fail(&mut cursor, e).await);
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(self.fail(&mut cursor, e).await),
            }
        }

        if let Err(e) = self.flush(&mut cursor).await {
            return Err(self.fail(&mut cursor, e).await);
        }
        self.health.set(&self.key, PartitionHealth::Stopped);
        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            dead_lettered = stats.dead_lettered,
            "Partition stopped"
        );
        Ok(stats)
    }
}
