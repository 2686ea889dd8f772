//! Parsed-definition cache
//!
//! Maps process definition ids to the model they were parsed from. Filled
//! after a deploy commits and on lookup misses; evicted when a deployment is
//! deleted. Suspension state is never cached; it is read from the store.

use std::sync::Arc;

use dashmap::DashMap;
use kestrel_core::{DeploymentId, ProcessDefinitionId};

use super::parser::ProcessModel;

/// One cached definition
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDefinition {
    /// Deployment the definition belongs to
    pub deployment_id: DeploymentId,
    /// Parsed model
    pub model: Arc<ProcessModel>,
}

/// Concurrent cache of parsed definitions
#[derive(Debug, Default)]
pub struct DeploymentCache {
    entries: DashMap<ProcessDefinitionId, CachedDefinition>,
}

impl DeploymentCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached model of a definition
    pub fn get(&self, id: &ProcessDefinitionId) -> Option<CachedDefinition> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Cache a model
    pub fn insert(&self, id: ProcessDefinitionId, deployment_id: DeploymentId, model: ProcessModel) {
        self.entries.insert(
            id,
            CachedDefinition {
                deployment_id,
                model: Arc::new(model),
            },
        );
    }

    /// Drop every definition of a deployment; returns how many were dropped
    pub fn evict_deployment(&self, deployment_id: &DeploymentId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| &cached.deployment_id != deployment_id);
        before - self.entries.len()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached definitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_only_that_deployment() {
        let cache = DeploymentCache::new();
        let d1 = DeploymentId::from("d-1");
        let d2 = DeploymentId::from("d-2");
        cache.insert(ProcessDefinitionId::from("a:1"), d1.clone(), ProcessModel::new("a"));
        cache.insert(ProcessDefinitionId::from("b:1"), d1.clone(), ProcessModel::new("b"));
        cache.insert(ProcessDefinitionId::from("a:2"), d2, ProcessModel::new("a"));

        assert_eq!(cache.evict_deployment(&d1), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&ProcessDefinitionId::from("a:2")).is_some());
        assert!(cache.get(&ProcessDefinitionId::from("a:1")).is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
