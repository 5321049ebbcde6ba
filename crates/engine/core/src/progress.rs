//! Per-partition consumption progress
//!
//! Progress is `{LastApplied, LastTimestamp}` per `(topic, partition)`;
//! consumption resumes at `LastApplied + 1`. Stores refuse to move
//! `LastApplied` backwards.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Checkpoint of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Progress {
    /// Offset of the last successfully applied message
    pub last_applied: i64,

    /// Timestamp of that message, milliseconds since the Unix epoch
    pub last_timestamp: i64,
}

impl Progress {
    pub fn new(last_applied: i64, last_timestamp: i64) -> Self {
        Self {
            last_applied,
            last_timestamp,
        }
    }

    /// First offset still to consume
    pub fn resume_offset(&self) -> i64 {
        self.last_applied + 1
    }
}

/// Identifies one partition of one topic
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: u32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

#[async_trait]
pub trait ProgressStore: Send + Sync + Debug {
    async fn load(&self, key: &PartitionKey) -> Result<Option<Progress>>;

    async fn save(&self, key: &PartitionKey, progress: Progress) -> Result<()>;
}

fn check_monotone(key: &PartitionKey, previous: Option<&Progress>, next: &Progress) -> Result<()> {
    match previous {
        Some(prev) if next.last_applied < prev.last_applied => Err(EngineError::Progress(format!(
            "{key}: LastApplied would move back from {} to {}",
            prev.last_applied, next.last_applied
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    entries: Mutex<BTreeMap<PartitionKey, Progress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> BTreeMap<PartitionKey, Progress> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn load(&self, key: &PartitionKey) -> Result<Option<Progress>> {
        Ok(self.entries.lock().get(key).copied())
    }

    async fn save(&self, key: &PartitionKey, progress: Progress) -> Result<()> {
        let mut entries = self.entries.lock();
        check_monotone(key, entries.get(key), &progress)?;
        entries.insert(key.clone(), progress);
        Ok(())
    }
}

// ============================================================================
// File-backed
// ============================================================================

/// One JSON document mapping `topic/partition` to its progress
///
/// Every save rewrites the document to a sibling temp file and renames it
/// over the original, so a crash leaves either the old or the new state.
#[derive(Debug)]
pub struct FileProgressStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<BTreeMap<String, Progress>>,
}

impl FileProgressStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self, key: &PartitionKey) -> Result<Option<Progress>> {
        Ok(self.entries.lock().await.get(&key.to_string()).copied())
    }

    async fn save(&self, key: &PartitionKey, progress: Progress) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let name = key.to_string();
        check_monotone(key, entries.get(&name), &progress)?;

        let mut next = entries.clone();
        next.insert(name, progress);
        let bytes = serde_json::to_vec_pretty(&next)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        *entries = next;
        debug!(partition = %key, last_applied = progress.last_applied, "Progress flushed");
        Ok(())
    }
}
