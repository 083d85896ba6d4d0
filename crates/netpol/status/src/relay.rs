//! Side-channel status relay
//!
//! Operator-side consumer of the side channel. Node statuses read from the
//! side store are accumulated per policy and written to the primary backend
//! through a [`StatusPublisher`]. Entries that were not written stay pending
//! for the next flush.

use std::collections::BTreeMap;
use std::sync::Arc;

use netpol_backend::CancelSignal;
use netpol_types::{NodeStatus, NodeStatusSet, PolicyRef};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{StatusError, StatusResult};
use crate::strategy::{KeyLayout, PublishTarget, StatusPublisher};

/// Relays side-channel statuses to the primary backend
pub struct StatusRelay {
    layout: KeyLayout,
    publisher: Arc<dyn StatusPublisher>,
    pending: Mutex<BTreeMap<PolicyRef, NodeStatusSet>>,
}

impl StatusRelay {
    pub fn new(layout: KeyLayout, publisher: Arc<dyn StatusPublisher>) -> Self {
        Self {
            layout,
            publisher,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record the status stored under `key`, replacing any pending entry for
    /// the same policy and node.
    pub fn ingest(&self, key: &str, value: &[u8]) -> StatusResult<()> {
        let (reference, node) = self
            .layout
            .parse(key)
            .ok_or_else(|| StatusError::InvalidKey(key.to_string()))?;
        let status: NodeStatus =
            serde_json::from_slice(value).map_err(|err| StatusError::Decode(err.to_string()))?;

        debug!(policy = %reference, node = %node, "Ingested side-channel status");
        self.pending
            .lock()
            .entry(reference)
            .or_default()
            .insert(node, status);
        Ok(())
    }

    /// Drop the pending entry stored under a deleted `key`.
    pub fn forget(&self, key: &str) -> StatusResult<()> {
        let (reference, node) = self
            .layout
            .parse(key)
            .ok_or_else(|| StatusError::InvalidKey(key.to_string()))?;

        let mut pending = self.pending.lock();
        if let Some(entries) = pending.get_mut(&reference) {
            entries.remove(&node);
            if entries.is_empty() {
                pending.remove(&reference);
            }
        }
        Ok(())
    }

    /// Number of node entries waiting to be published.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().map(|entries| entries.len()).sum()
    }

    /// Publish all pending entries, one policy at a time.
    ///
    /// A failure for one policy does not stop the others; the first error is
    /// returned once every policy has been tried. An entry re-ingested with a
    /// new value while its publish was in flight stays pending.
    pub async fn flush(&self, cancel: &CancelSignal) -> StatusResult<()> {
        let snapshot = self.pending.lock().clone();
        let mut first_error = None;

        for (reference, entries) in snapshot {
            if cancel.is_cancelled() {
                return Err(StatusError::Cancelled);
            }

            let mut remaining = entries.clone();
            let target = PublishTarget::by_reference(reference.clone());
            let result = self.publisher.publish(cancel, &target, &mut remaining).await;

            {
                let mut pending = self.pending.lock();
                if let Some(current) = pending.get_mut(&reference) {
                    for (node, status) in &entries {
                        if !remaining.contains_key(node) && current.get(node) == Some(status) {
                            current.remove(node);
                        }
                    }
                    if current.is_empty() {
                        pending.remove(&reference);
                    }
                }
            }

            if let Err(err) = result {
                warn!(
                    policy = %reference,
                    remaining = remaining.len(),
                    error = %err,
                    "Relayed status publish failed"
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
