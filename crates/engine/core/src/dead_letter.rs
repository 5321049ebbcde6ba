//! Dead letters
//!
//! Messages that decoded but failed validation are parked here with the
//! reason; the partition moves on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::warn;

use crate::error::Result;
use crate::progress::PartitionKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub reason: String,
    pub payload: String,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        key: &PartitionKey,
        offset: i64,
        reason: impl Into<String>,
        payload: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: key.topic.clone(),
            partition: key.partition,
            offset,
            reason: reason.into(),
            payload: payload.into(),
            recorded_at,
        }
    }
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync + Debug {
    async fn push(&self, letter: DeadLetter) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.lock().is_empty()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, letter: DeadLetter) -> Result<()> {
        warn!(
            topic = %letter.topic,
            partition = letter.partition,
            offset = letter.offset,
            reason = %letter.reason,
            "Message dead-lettered"
        );
        self.letters.lock().push(letter);
        Ok(())
    }
}
