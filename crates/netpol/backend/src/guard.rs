//! Identity guard against writing to a recreated object
//!
//! A policy deleted and recreated under the same name keeps its reference
//! but gets a new UID. Any write computed for the old object must not land
//! on the new one.

use std::sync::Arc;

use netpol_types::{PolicyObject, PolicyUid};
use tracing::warn;

use crate::cache::PolicyCache;
use crate::error::{BackendError, BackendResult};

/// Compares the UID of a live object against the UID a write was computed for
#[derive(Clone, Default)]
pub struct ConflictGuard {
    cache: Option<Arc<dyn PolicyCache>>,
}

impl ConflictGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard that also purges the stale cache entry on mismatch.
    pub fn with_cache(cache: Arc<dyn PolicyCache>) -> Self {
        Self { cache: Some(cache) }
    }

    /// Fail with [`BackendError::IdentityMismatch`] if `live` is not the
    /// object identified by `expected`.
    pub fn verify(&self, live: &PolicyObject, expected: PolicyUid) -> BackendResult<()> {
        if live.uid() == expected {
            return Ok(());
        }

        let reference = live.reference();
        warn!(
            policy = %reference,
            expected_uid = %expected,
            live_uid = %live.uid(),
            "Policy was recreated under the same name, dropping stale write"
        );
        if let Some(cache) = &self.cache {
            cache.delete(&reference);
        }

        Err(BackendError::IdentityMismatch {
            policy: reference.to_string(),
            expected,
            actual: live.uid(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryPolicyCache;

    #[test]
    fn test_matching_uid_passes() {
        let policy = PolicyObject::namespaced("prod", "web", vec![]);
        assert!(ConflictGuard::new().verify(&policy, policy.uid()).is_ok());
    }

    #[test]
    fn test_mismatch_purges_cache() {
        let cache = Arc::new(InMemoryPolicyCache::new());
        let recreated = PolicyObject::namespaced("prod", "web", vec![]);
        cache.upsert(recreated.clone());

        let guard = ConflictGuard::with_cache(cache.clone());
        let err = guard.verify(&recreated, PolicyUid::generate()).unwrap_err();

        assert!(matches!(err, BackendError::IdentityMismatch { .. }));
        assert!(!cache.contains(&recreated.reference()));
    }
}
