//! Typed entity collections

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted<V> {
    Inserted,
    Updated(V),
    /// Identical to what was stored; nothing changed
    Unchanged,
}

/// A keyed collection behind a many-reader/single-writer lock
///
/// Iteration is in key order so reads are deterministic.
#[derive(Debug)]
pub struct Collection<K, V> {
    items: RwLock<BTreeMap<K, V>>,
}

impl<K, V> Default for Collection<K, V> {
    fn default() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Collection<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upsert(&self, key: K, value: V) -> Upserted<V> {
        let mut items = self.items.write();
        if items.get(&key).is_some_and(|existing| *existing == value) {
            return Upserted::Unchanged;
        }
        match items.insert(key, value) {
            Some(previous) => Upserted::Updated(previous),
            None => Upserted::Inserted,
        }
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        self.items.write().remove(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.items.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.items.read().contains_key(key)
    }

    /// Snapshot of every entry
    pub fn items(&self) -> BTreeMap<K, V> {
        self.items.read().clone()
    }

    pub fn values(&self) -> Vec<V> {
        self.items.read().values().cloned().collect()
    }

    pub fn filter(&self, mut pred: impl FnMut(&V) -> bool) -> Vec<V> {
        self.items.read().values().filter(|v| pred(v)).cloned().collect()
    }

    pub fn find(&self, mut pred: impl FnMut(&V) -> bool) -> Option<V> {
        self.items.read().values().find(|v| pred(v)).cloned()
    }

    /// Run `f` with the read guard held
    pub fn with_read<R>(&self, f: impl FnOnce(&BTreeMap<K, V>) -> R) -> R {
        f(&self.items.read())
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_reports_outcome() {
        let c: Collection<String, u32> = Collection::new();
        assert_eq!(c.upsert("a".into(), 1), Upserted::Inserted);
        assert_eq!(c.upsert("a".into(), 1), Upserted::Unchanged);
        assert_eq!(c.upsert("a".into(), 2), Upserted::Updated(1));
        assert_eq!(c.get(&"a".to_string()), Some(2));
        assert_eq!(c.remove(&"a".to_string()), Some(2));
        assert!(c.is_empty());
    }

    #[test]
    fn test_items_are_key_ordered() {
        let c: Collection<String, u32> = Collection::new();
        for k in ["c", "a", "b"] {
            c.upsert(k.into(), 0);
        }
        let keys: Vec<_> = c.items().into_keys().collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }
}
