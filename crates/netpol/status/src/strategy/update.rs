//! Full-object update strategy
//!
//! Used when the backend offers neither status patches nor a status
//! subresource. The whole object is written back, so a concurrent edit to a
//! non-status field made between the read and the write is overwritten.

use std::sync::Arc;

use async_trait::async_trait;
use netpol_backend::{CancelSignal, ConflictGuard, PolicyBackend};
use netpol_types::NodeStatusSet;
use tracing::debug;

use super::{live_object, PublishTarget, StatusPublisher};
use crate::error::StatusResult;

/// Publishes by replacing the whole object
pub struct FullUpdatePublisher {
    backend: Arc<dyn PolicyBackend>,
    guard: ConflictGuard,
}

impl FullUpdatePublisher {
    pub fn new(backend: Arc<dyn PolicyBackend>, guard: ConflictGuard) -> Self {
        Self { backend, guard }
    }
}

#[async_trait]
impl StatusPublisher for FullUpdatePublisher {
    async fn publish(
        &self,
        _cancel: &CancelSignal,
        target: &PublishTarget,
        pending: &mut NodeStatusSet,
    ) -> StatusResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let mut live = live_object(self.backend.as_ref(), &self.guard, target).await?;
        live.status_or_default().apply(pending);
        self.backend.update(live).await?;

        debug!(policy = %target.reference, nodes = pending.len(), "Replaced policy object");
        pending.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "full-update"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_backend::{
        BackendCapabilities, BackendOp, InMemoryPolicyBackend, InMemoryPolicyCache, PolicyCache,
    };
    use netpol_types::{NodeName, NodeStatus, PolicyObject, PolicyUid};

    #[tokio::test]
    async fn test_single_update_per_publish() {
        let backend = Arc::new(InMemoryPolicyBackend::new(BackendCapabilities::none()));
        let policy = backend.insert(PolicyObject::namespaced("prod", "web", vec![]));
        let publisher = FullUpdatePublisher::new(backend.clone(), ConflictGuard::new());

        let mut pending = NodeStatusSet::new();
        pending.insert(NodeName::new("a"), NodeStatus::enforced(3));
        publisher
            .publish(&CancelSignal::never(), &PublishTarget::for_object(&policy), &mut pending)
            .await
            .unwrap();

        assert_eq!(backend.calls(BackendOp::Update), 1);
        assert_eq!(backend.calls(BackendOp::UpdateStatus), 0);
        let stored = backend.stored(&policy.reference()).unwrap();
        assert_eq!(stored.status.unwrap().nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_recreated_object_is_refused() {
        let backend = Arc::new(InMemoryPolicyBackend::new(BackendCapabilities::none()));
        let policy = backend.insert(PolicyObject::namespaced("prod", "web", vec![]));
        let cache = Arc::new(InMemoryPolicyCache::new());
        cache.upsert(policy.clone());

        let mut recreated = policy.clone();
        recreated.metadata.uid = PolicyUid::generate();
        backend.insert(recreated);

        let publisher =
            FullUpdatePublisher::new(backend.clone(), ConflictGuard::with_cache(cache.clone()));
        let mut target = PublishTarget::for_object(&policy);
        target.object = None;
        let mut pending = NodeStatusSet::new();
        pending.insert(NodeName::new("a"), NodeStatus::enforced(3));

        let err = publisher
            .publish(&CancelSignal::never(), &target, &mut pending)
            .await
            .unwrap_err();
        assert!(err.is_identity_mismatch());
        assert!(!cache.contains(&policy.reference()));
        assert_eq!(backend.calls(BackendOp::Update), 0);
    }
}
