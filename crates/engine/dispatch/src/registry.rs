//! Registered dispatchers, keyed by type

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::agent::Dispatchable;

#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    dispatchers: Arc<DashMap<String, Arc<dyn Dispatchable>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatcher; replaces any previous one of the same type
    pub fn register(&self, dispatcher: Arc<dyn Dispatchable>) {
        let kind = dispatcher.kind().to_string();
        info!(kind = %kind, "Registered job dispatcher");
        self.dispatchers.insert(kind, dispatcher);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Dispatchable>> {
        self.dispatchers.get(kind).map(|d| Arc::clone(d.value()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.dispatchers.contains_key(kind)
    }

    /// Registered types, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.dispatchers.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAgent;

    #[test]
    fn test_register_and_lookup() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(InMemoryAgent::new("webhook")));
        registry.register(Arc::new(InMemoryAgent::new("github-action")));

        assert!(registry.contains("github-action"));
        assert!(registry.get("argo").is_none());
        assert_eq!(registry.kinds(), ["github-action", "webhook"]);
    }
}
