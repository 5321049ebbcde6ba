//! Partitioned append-only log
//!
//! The consumer reads through [`PartitionedLog`]; offsets start at 0 and are
//! dense within a `(topic, partition)`. [`InMemoryLog`] serves tests,
//! [`FileLog`] keeps one JSON-lines file per partition so the daemon runs
//! without an external broker.

use async_trait::async_trait;
use engine_types::RawEvent;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};

/// One message at one offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub offset: i64,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Partitioning key
    pub key: String,

    /// Raw message text; not guaranteed to be a valid envelope
    pub payload: String,
}

#[async_trait]
pub trait PartitionedLog: Send + Sync + Debug {
    /// Append a message; returns its offset
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: String,
        timestamp: i64,
    ) -> Result<i64>;

    /// Up to `max` records starting at offset `from`, in offset order
    async fn read(&self, topic: &str, partition: u32, from: i64, max: usize) -> Result<Vec<LogRecord>>;

    /// Offset the next append will receive
    async fn end_offset(&self, topic: &str, partition: u32) -> Result<i64>;
}

/// Append `event` to the partition owning its workspace
///
/// Every event of one workspace lands on the same partition, which is what
/// linearises a workspace's event application.
pub async fn publish(
    log: &dyn PartitionedLog,
    topic: &str,
    partitions: u32,
    event: &RawEvent,
) -> Result<(u32, i64)> {
    let partition = event.workspace_id.partition(partitions);
    let payload = serde_json::to_string(event)?;
    let offset = log
        .append(
            topic,
            partition,
            &event.workspace_id.to_string(),
            payload,
            event.timestamp.timestamp_millis(),
        )
        .await?;
    debug!(
        topic,
        partition,
        offset,
        event_type = %event.event_type,
        "Event published"
    );
    Ok((partition, offset))
}

fn slice(records: &[LogRecord], from: i64, max: usize) -> Vec<LogRecord> {
    let start = usize::try_from(from.max(0)).unwrap_or(usize::MAX);
    records.iter().skip(start).take(max).cloned().collect()
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryLog {
    partitions: RwLock<BTreeMap<(String, u32), Vec<LogRecord>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of one partition
    pub fn records(&self, topic: &str, partition: u32) -> Vec<LogRecord> {
        self.partitions
            .read()
            .get(&(topic.to_string(), partition))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PartitionedLog for InMemoryLog {
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: String,
        timestamp: i64,
    ) -> Result<i64> {
        let mut partitions = self.partitions.write();
        let records = partitions.entry((topic.to_string(), partition)).or_default();
        let offset = records.len() as i64;
        records.push(LogRecord {
            offset,
            timestamp,
            key: key.to_string(),
            payload,
        });
        Ok(offset)
    }

    async fn read(&self, topic: &str, partition: u32, from: i64, max: usize) -> Result<Vec<LogRecord>> {
        Ok(self
            .partitions
            .read()
            .get(&(topic.to_string(), partition))
            .map(|records| slice(records, from, max))
            .unwrap_or_default())
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        Ok(self
            .partitions
            .read()
            .get(&(topic.to_string(), partition))
            .map_or(0, |records| records.len() as i64))
    }
}

// ============================================================================
// File-backed
// ============================================================================

/// `<dir>/<topic>/<partition>.jsonl`, one [`LogRecord`] per line
///
/// Appends are serialised per log; records are cached after the first read
/// of a partition so reads do not rescan the file.
#[derive(Debug)]
pub struct FileLog {
    dir: PathBuf,
    cache: Mutex<BTreeMap<(String, u32), Vec<LogRecord>>>,
}

impl FileLog {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, topic: &str, partition: u32) -> PathBuf {
        self.dir.join(topic).join(format!("{partition}.jsonl"))
    }

    async fn load(&self, topic: &str, partition: u32) -> Result<Vec<LogRecord>> {
        let path = self.partition_path(topic, partition);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(line).map_err(|e| {
                EngineError::Log(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            if record.offset != records.len() as i64 {
                return Err(EngineError::Log(format!(
                    "{}: expected offset {}, found {}",
                    path.display(),
                    records.len(),
                    record.offset
                )));
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn cached<'a>(
        &self,
        cache: &'a mut BTreeMap<(String, u32), Vec<LogRecord>>,
        topic: &str,
        partition: u32,
    ) -> Result<&'a mut Vec<LogRecord>> {
        let key = (topic.to_string(), partition);
        if !cache.contains_key(&key) {
            let records = self.load(topic, partition).await?;
            cache.insert(key.clone(), records);
        }
        cache
            .get_mut(&key)
            .ok_or_else(|| EngineError::Log(format!("partition {topic}/{partition} not cached")))
    }
}

#[async_trait]
impl PartitionedLog for FileLog {
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: String,
        timestamp: i64,
    ) -> Result<i64> {
        let mut cache = self.cache.lock().await;
        let records = self.cached(&mut cache, topic, partition).await?;

        let record = LogRecord {
            offset: records.len() as i64,
            timestamp,
            key: key.to_string(),
            payload,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let path = self.partition_path(topic, partition);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        let offset = record.offset;
        records.push(record);
        Ok(offset)
    }

    async fn read(&self, topic: &str, partition: u32, from: i64, max: usize) -> Result<Vec<LogRecord>> {
        let mut cache = self.cache.lock().await;
        let records = self.cached(&mut cache, topic, partition).await?;
        Ok(slice(records, from, max))
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let mut cache = self.cache.lock().await;
        let records = self.cached(&mut cache, topic, partition).await?;
        Ok(records.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use engine_types::{EventKind, WorkspaceId};
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_offsets_are_dense() {
        let log = InMemoryLog::new();
        for i in 0..5 {
            let offset = log.append("events", 0, "k", format!("m{i}"), i).await.unwrap();
            assert_eq!(offset, i);
        }
        let page = log.read("events", 0, 2, 2).await.unwrap();
        assert_eq!(page.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(log.end_offset("events", 0).await.unwrap(), 5);
        assert!(log.read("events", 1, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_uses_workspace_partition() {
        let log = InMemoryLog::new();
        let ws = WorkspaceId::generate();
        let event = RawEvent::new(EventKind::SystemCreated, ws, DateTime::<Utc>::default(), json!({"id": "s1"}))
            .unwrap();

        let (partition, offset) = publish(&log, "events", 4, &event).await.unwrap();
        assert_eq!(partition, ws.partition(4));
        assert_eq!(offset, 0);
        let stored = &log.records("events", partition)[0];
        assert_eq!(stored.key, ws.to_string());
        assert_eq!(RawEvent::from_bytes(stored.payload.as_bytes()).unwrap(), event);
    }

    #[tokio::test]
    async fn test_file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = FileLog::open(dir.path()).await.unwrap();
            log.append("events", 3, "k", "first".into(), 1).await.unwrap();
            log.append("events", 3, "k", "second".into(), 2).await.unwrap();
        }

        let log = FileLog::open(dir.path()).await.unwrap();
        assert_eq!(log.end_offset("events", 3).await.unwrap(), 2);
        assert_eq!(log.append("events", 3, "k", "third".into(), 3).await.unwrap(), 2);

        let records = log.read("events", 3, 1, 10).await.unwrap();
        let payloads: Vec<_> = records.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(payloads, vec!["second", "third"]);
    }
}
