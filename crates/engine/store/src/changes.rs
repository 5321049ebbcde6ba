//! Change sets
//!
//! A [`ChangeSet`] accumulates every mutation made while applying one event.
//! Entries carry the event timestamp rather than wall-clock time so that a
//! replay records identical change sets.

use chrono::{DateTime, Utc};
use engine_types::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Insert => "insert",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One recorded mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub entity: EntityKind,
    pub change_type: ChangeType,
    pub id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Ordered mutations produced by one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    timestamp: DateTime<Utc>,
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            changes: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn record(
        &mut self,
        entity: EntityKind,
        change_type: ChangeType,
        id: impl ToString,
        data: serde_json::Value,
    ) {
        self.changes.push(Change {
            entity,
            change_type,
            id: id.to_string(),
            data,
            timestamp: self.timestamp,
        });
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn count(&self, entity: EntityKind, change_type: ChangeType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.entity == entity && c.change_type == change_type)
            .count()
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_keep_insertion_order_and_event_time() {
        let ts = DateTime::<Utc>::default();
        let mut cs = ChangeSet::new(ts);
        cs.record(EntityKind::Resource, ChangeType::Insert, "r1", serde_json::Value::Null);
        cs.record(EntityKind::ReleaseTarget, ChangeType::Insert, "d1:e1:r1", serde_json::Value::Null);

        let ids: Vec<_> = cs.changes().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["r1", "d1:e1:r1"]);
        assert!(cs.changes().iter().all(|c| c.timestamp == ts));
        assert_eq!(cs.count(EntityKind::Resource, ChangeType::Insert), 1);
    }
}
