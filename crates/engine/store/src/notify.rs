//! Coalescing change notifications
//!
//! The store publishes `(kind, id, change-type)` for every committed mutation.
//! Publishing never blocks: a newer notification for the same `(kind, id)`
//! replaces the older one, and when the buffer is full the queue collapses
//! into a single "resync everything" flag.

use crate::changes::ChangeType;
use engine_types::EntityKind;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: EntityKind,
    pub id: String,
    pub change_type: ChangeType,
}

/// Everything published since the last drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationBatch {
    pub notifications: Vec<Notification>,
    /// The buffer overflowed; the subscriber must re-derive from scratch
    pub resync: bool,
}

impl NotificationBatch {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && !self.resync
    }
}

#[derive(Debug, Default)]
struct Pending {
    queue: VecDeque<Notification>,
    resync: bool,
    coalesced: u64,
}

/// Bounded, non-blocking, single-subscriber notification channel
#[derive(Debug)]
pub struct ChangeNotifier {
    pending: Mutex<Pending>,
    signal: Notify,
    capacity: usize,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            signal: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, kind: EntityKind, id: impl Into<String>, change_type: ChangeType) {
        let notification = Notification {
            kind,
            id: id.into(),
            change_type,
        };
        {
            let mut pending = self.pending.lock();
            if let Some(pos) = pending
                .queue
                .iter()
                .position(|n| n.kind == notification.kind && n.id == notification.id)
            {
                pending.queue.remove(pos);
                pending.coalesced += 1;
            }
            // A pending resync already covers this change
            if !pending.resync {
                if pending.queue.len() >= self.capacity {
                    tracing::warn!(
                        capacity = self.capacity,
                        "Change notification buffer full, collapsing to resync"
                    );
                    pending.queue.clear();
                    pending.resync = true;
                } else {
                    pending.queue.push_back(notification);
                }
            }
        }
        self.signal.notify_one();
    }

    /// Force the subscriber to re-derive everything on its next drain
    pub fn request_resync(&self) {
        {
            let mut pending = self.pending.lock();
            pending.queue.clear();
            pending.resync = true;
        }
        self.signal.notify_one();
    }

    /// Take everything published so far
    pub fn drain(&self) -> NotificationBatch {
        let mut pending = self.pending.lock();
        NotificationBatch {
            notifications: pending.queue.drain(..).collect(),
            resync: std::mem::take(&mut pending.resync),
        }
    }

    /// Wait until something is published. A publish that happened before the
    /// call is not lost.
    pub async fn wait(&self) {
        self.signal.notified().await;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().queue.len()
    }

    pub fn coalesced(&self) -> u64 {
        self.pending.lock().coalesced
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_key_is_coalesced_to_latest() {
        let notifier = ChangeNotifier::new(8);
        notifier.publish(EntityKind::Resource, "r1", ChangeType::Insert);
        notifier.publish(EntityKind::Resource, "r2", ChangeType::Insert);
        notifier.publish(EntityKind::Resource, "r1", ChangeType::Update);

        let batch = notifier.drain();
        assert!(!batch.resync);
        let keys: Vec<_> = batch
            .notifications
            .iter()
            .map(|n| (n.id.as_str(), n.change_type))
            .collect();
        assert_eq!(keys, [("r2", ChangeType::Insert), ("r1", ChangeType::Update)]);
        assert_eq!(notifier.coalesced(), 1);
    }

    #[test]
    fn test_overflow_collapses_to_resync() {
        let notifier = ChangeNotifier::new(2);
        for id in ["a", "b", "c", "d"] {
            notifier.publish(EntityKind::Resource, id, ChangeType::Insert);
        }
        let batch = notifier.drain();
        assert!(batch.resync);
        assert!(batch.notifications.is_empty());
        assert!(notifier.drain().is_empty());
    }

    #[tokio::test]
    async fn test_publish_before_wait_is_not_lost() {
        let notifier = ChangeNotifier::new(4);
        notifier.publish(EntityKind::Deployment, "d1", ChangeType::Insert);
        tokio::time::timeout(Duration::from_secs(1), notifier.wait())
            .await
            .unwrap();
        assert_eq!(notifier.drain().notifications.len(), 1);
    }
}
