//! Partition health
//!
//! Workers report their state here; the daemon serves it on `/health`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::progress::PartitionKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PartitionHealth {
    Running,
    /// Stopped on a state error; needs an operator
    Halted { reason: String },
    Stopped,
}

impl PartitionHealth {
    pub fn is_halted(&self) -> bool {
        matches!(self, PartitionHealth::Halted { .. })
    }
}

impl fmt::Display for PartitionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionHealth::Running => write!(f, "running"),
            PartitionHealth::Halted { reason } => write!(f, "halted: {reason}"),
            PartitionHealth::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthBoard {
    partitions: RwLock<BTreeMap<PartitionKey, PartitionHealth>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &PartitionKey, health: PartitionHealth) {
        self.partitions.write().insert(key.clone(), health);
    }

    pub fn get(&self, key: &PartitionKey) -> Option<PartitionHealth> {
        self.partitions.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<PartitionKey, PartitionHealth> {
        self.partitions.read().clone()
    }

    /// True while no partition is halted
    pub fn is_healthy(&self) -> bool {
        !self.partitions.read().values().any(PartitionHealth::is_halted)
    }
}
