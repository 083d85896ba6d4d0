//! Status-subresource strategy
//!
//! Mutates this node's entries on the live object and writes them back with
//! a status-only update. The backend's version check rejects the write if
//! the object changed since it was read.

use std::sync::Arc;

use async_trait::async_trait;
use netpol_backend::{CancelSignal, ConflictGuard, PolicyBackend};
use netpol_types::NodeStatusSet;
use tracing::debug;

use super::{live_object, PublishTarget, StatusPublisher};
use crate::error::StatusResult;

/// Publishes through status-only updates
pub struct StatusSubresourcePublisher {
    backend: Arc<dyn PolicyBackend>,
    guard: ConflictGuard,
}

impl StatusSubresourcePublisher {
    pub fn new(backend: Arc<dyn PolicyBackend>, guard: ConflictGuard) -> Self {
        Self { backend, guard }
    }
}

#[async_trait]
impl StatusPublisher for StatusSubresourcePublisher {
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
        let stored = self.backend.update_status(live).await?;

        debug!(
            policy = %target.reference,
            nodes = pending.len(),
            version = %stored.metadata.resource_version,
            "Updated status subresource"
        );
        pending.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "status-subresource"
    }
}
