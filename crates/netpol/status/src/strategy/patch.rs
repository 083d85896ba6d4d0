//! JSON patch strategy
//!
//! The first writer creates the status map with a compound test-then-add
//! patch, which at most one concurrent writer can win. Everyone else sets
//! their entries with per-node replace operations, in batches of bounded
//! size. Batches commit independently: entries of a failed batch, and of all
//! batches after it, stay pending for the next attempt.

use std::sync::Arc;

use async_trait::async_trait;
use netpol_backend::{
    node_status_path, BackendError, CancelSignal, PatchOperation, PolicyBackend, STATUS_PATH,
};
use netpol_types::{NodeName, NodeStatusSet, PolicyStatus};
use serde_json::Value;
use tracing::{debug, warn};

use super::{PublishTarget, StatusPublisher};
use crate::error::{StatusError, StatusResult};

/// Publishes through status JSON patches
pub struct PatchPublisher {
    backend: Arc<dyn PolicyBackend>,
    max_operations: usize,
}

impl PatchPublisher {
    pub fn new(backend: Arc<dyn PolicyBackend>, max_operations: usize) -> Self {
        Self {
            backend,
            max_operations: max_operations.max(1),
        }
    }

    async fn create_status(
        &self,
        target: &PublishTarget,
        pending: &NodeStatusSet,
    ) -> StatusResult<()> {
        let status = PolicyStatus::with_nodes(pending.clone());
        let ops = [
            PatchOperation::Test {
                path: STATUS_PATH.to_string(),
                value: Value::Null,
            },
            PatchOperation::Add {
                path: STATUS_PATH.to_string(),
                value: serde_json::to_value(&status).map_err(BackendError::from)?,
            },
        ];
        self.backend.patch_status(&target.reference, &ops).await?;
        Ok(())
    }

    async fn replace_batch(
        &self,
        target: &PublishTarget,
        batch: &[(NodeName, Value)],
    ) -> StatusResult<()> {
        let ops: Vec<PatchOperation> = batch
            .iter()
            .map(|(node, value)| PatchOperation::Replace {
                path: node_status_path(node),
                value: value.clone(),
            })
            .collect();
        self.backend.patch_status(&target.reference, &ops).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for PatchPublisher {
    async fn publish(
        &self,
        _cancel: &CancelSignal,
        target: &PublishTarget,
        pending: &mut NodeStatusSet,
    ) -> StatusResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        match self.create_status(target, pending).await {
            Ok(()) => {
                debug!(policy = %target.reference, nodes = pending.len(), "Created status map");
                pending.clear();
                return Ok(());
            }
            Err(StatusError::Backend(BackendError::TestFailed { .. })) => {
                debug!(
                    policy = %target.reference,
                    "Status map exists, falling back to per-node replace"
                );
            }
            Err(err) => return Err(err),
        }

        let mut entries = Vec::with_capacity(pending.len());
        for (node, status) in pending.iter() {
            let value = serde_json::to_value(status).map_err(BackendError::from)?;
            entries.push((node.clone(), value));
        }

        for batch in entries.chunks(self.max_operations) {
            if let Err(err) = self.replace_batch(target, batch).await {
                warn!(
                    policy = %target.reference,
                    remaining = pending.len(),
                    error = %err,
                    "Status patch batch failed"
                );
                return Err(err);
            }
            for (node, _) in batch {
                pending.remove(node);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "patch"
    }
}
