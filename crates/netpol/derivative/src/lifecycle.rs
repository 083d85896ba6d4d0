//! Create-or-update of derivative policies
//!
//! Derivatives have a single producer, so an existing derivative is simply
//! overwritten: no merge of rule content is attempted.

use std::sync::Arc;

use netpol_backend::{BackendError, PolicyBackend};
use netpol_types::PolicyObject;
use tracing::{debug, info};

use crate::error::DerivativeResult;

/// Idempotent writer of derivative policies
pub struct DerivativeLifecycle {
    backend: Arc<dyn PolicyBackend>,
}

impl DerivativeLifecycle {
    pub fn new(backend: Arc<dyn PolicyBackend>) -> Self {
        Self { backend }
    }

    /// Create `derivative`, or overwrite the labels and rules of the existing
    /// one and reset its status.
    pub async fn upsert(&self, derivative: PolicyObject) -> DerivativeResult<PolicyObject> {
        let reference = derivative.reference();

        if let Some(existing) = self.backend.get(&reference).await? {
            return self.overwrite(existing, derivative).await;
        }

        match self.backend.create(derivative.clone()).await {
            Ok(created) => {
                info!(derivative = %reference, uid = %created.uid(), "Created derivative policy");
                Ok(created)
            }
            Err(BackendError::AlreadyExists(_)) => {
                // Created concurrently between lookup and create.
                let existing = self.backend.fetch(&reference).await?;
                self.overwrite(existing, derivative).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn overwrite(
        &self,
        mut existing: PolicyObject,
        derivative: PolicyObject,
    ) -> DerivativeResult<PolicyObject> {
        existing.metadata.labels = derivative.metadata.labels;
        existing.specs = derivative.specs;
        existing.status = None;

        let updated = self.backend.update(existing).await?;
        debug!(
            derivative = %updated.reference(),
            version = %updated.metadata.resource_version,
            "Updated derivative policy"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::DerivativeSynthesizer;
    use netpol_backend::{BackendOp, InMemoryPolicyBackend};
    use netpol_types::{NodeName, NodeStatus, PolicyScope, Rule, Selector};

    fn derivative(parent: &PolicyObject) -> PolicyObject {
        let mut derivative = DerivativeSynthesizer::skeleton(parent, PolicyScope::Namespaced);
        derivative.specs = vec![Rule::for_endpoints(Selector::any())];
        derivative
    }

    #[tokio::test]
    async fn test_upsert_creates_when_missing() {
        let backend = Arc::new(InMemoryPolicyBackend::default());
        let lifecycle = DerivativeLifecycle::new(backend.clone());

        let parent = PolicyObject::namespaced("prod", "web", vec![]);
        let created = lifecycle.upsert(derivative(&parent)).await.unwrap();
        assert!(!created.uid().is_unassigned());
        assert_eq!(backend.calls(BackendOp::Create), 1);
        assert_eq!(backend.calls(BackendOp::Update), 0);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_existing() {
        let backend = Arc::new(InMemoryPolicyBackend::new(
            netpol_backend::BackendCapabilities::none(),
        ));
        let parent = PolicyObject::namespaced("prod", "web", vec![]);
        let mut stale = derivative(&parent);
        stale.metadata.labels.insert("stale".into(), "yes".into());
        stale
            .status_or_default()
            .set_node_status(NodeName::new("n1"), NodeStatus::enforced(4));
        let stored = backend.insert(stale);

        let lifecycle = DerivativeLifecycle::new(backend.clone());
        let mut fresh = derivative(&parent);
        fresh.specs.push(Rule::for_endpoints(Selector::any().with_label("a", "b")));
        let updated = lifecycle.upsert(fresh.clone()).await.unwrap();

        assert_eq!(updated.uid(), stored.uid());
        assert_eq!(updated.metadata.labels, fresh.metadata.labels);
        assert_eq!(updated.specs, fresh.specs);
        assert!(updated.status.is_none());
        assert_eq!(backend.calls(BackendOp::Update), 1);
        assert_eq!(backend.calls(BackendOp::Create), 0);
    }
}
