//! Local policy cache
//!
//! Agents keep a watch-fed copy of every policy they enforce. Writers refresh
//! it after a successful write and purge entries they know to be stale.

use dashmap::DashMap;
use netpol_types::{PolicyObject, PolicyRef};

/// Local copy of policy objects
pub trait PolicyCache: Send + Sync {
    fn get(&self, reference: &PolicyRef) -> Option<PolicyObject>;

    /// Insert or replace the cached copy of `policy`.
    fn upsert(&self, policy: PolicyObject);

    /// Remove the cached copy, if any.
    fn delete(&self, reference: &PolicyRef);
}

/// In-memory policy cache
#[derive(Default)]
pub struct InMemoryPolicyCache {
    entries: DashMap<PolicyRef, PolicyObject>,
}

impl InMemoryPolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, reference: &PolicyRef) -> bool {
        self.entries.contains_key(reference)
    }
}

impl PolicyCache for InMemoryPolicyCache {
    fn get(&self, reference: &PolicyRef) -> Option<PolicyObject> {
        self.entries.get(reference).map(|entry| entry.clone())
    }

    fn upsert(&self, policy: PolicyObject) {
        self.entries.insert(policy.reference(), policy);
    }

    fn delete(&self, reference: &PolicyRef) {
        self.entries.remove(reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces() {
        let cache = InMemoryPolicyCache::new();
        let first = PolicyObject::namespaced("prod", "web", vec![]);
        let second = PolicyObject::namespaced("prod", "web", vec![]);

        cache.upsert(first);
        cache.upsert(second.clone());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&second.reference()).unwrap().uid(), second.uid());

        cache.delete(&second.reference());
        assert!(cache.is_empty());
    }
}
