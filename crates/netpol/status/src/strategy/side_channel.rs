//! Side-channel strategy
//!
//! Writes each node status as JSON to a key-value store instead of the
//! primary backend. Every node writes under its own key:
//!
//! ```text
//! <prefix>/state/<root>/v1/<namespace>/<name>/<node>
//! ```
//!
//! Cluster-scoped policies have no namespace segment.

use std::sync::Arc;

use async_trait::async_trait;
use netpol_backend::{BackendError, CancelSignal, SideStore};
use netpol_types::{NodeName, NodeStatusSet, PolicyRef};
use tracing::{debug, info};

use super::{PublishTarget, StatusPublisher};
use crate::config::SideChannelConfig;
use crate::error::{StatusError, StatusResult};

const STATE_SEGMENT: &str = "state";
const VERSION_SEGMENT: &str = "v1";

/// Formats and parses side-channel status keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
    root: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            root: root.into(),
        }
    }

    pub fn from_config(config: &SideChannelConfig) -> Self {
        Self::new(config.key_prefix.clone(), config.statuses_root.clone())
    }

    /// Key prefix shared by every status key of this layout, with a
    /// trailing separator.
    pub fn base(&self) -> String {
        format!("{}/{}/{}/{}/", self.prefix, STATE_SEGMENT, self.root, VERSION_SEGMENT)
    }

    /// Key for `node`'s status of the policy `namespace/name`. An empty
    /// namespace is omitted.
    pub fn key(&self, namespace: &str, name: &str, node: &NodeName) -> String {
        if namespace.is_empty() {
            format!("{}{}/{}", self.base(), name, node)
        } else {
            format!("{}{}/{}/{}", self.base(), namespace, name, node)
        }
    }

    pub fn key_for(&self, reference: &PolicyRef, node: &NodeName) -> String {
        self.key(reference.namespace_or_empty(), &reference.name, node)
    }

    /// Policy and node a key belongs to. Keys outside this layout, or with
    /// empty segments, yield `None`.
    pub fn parse(&self, key: &str) -> Option<(PolicyRef, NodeName)> {
        let rest = key.strip_prefix(&self.base())?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return None;
        }
        match segments.as_slice() {
            [namespace, name, node] => Some((
                PolicyRef::namespaced(*namespace, *name),
                NodeName::new(*node),
            )),
            [name, node] => Some((PolicyRef::cluster_scoped(*name), NodeName::new(*node))),
            _ => None,
        }
    }
}

/// Publishes node statuses to a side store
pub struct SideChannelPublisher {
    store: Arc<dyn SideStore>,
    layout: KeyLayout,
}

impl SideChannelPublisher {
    pub fn new(store: Arc<dyn SideStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    async fn wait_connected(&self, cancel: &CancelSignal) -> StatusResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StatusError::Cancelled),
            _ = self.store.connected() => Ok(()),
        }
    }

    /// Remove `node`'s status key for a policy that went away.
    pub async fn delete_node_status(
        &self,
        cancel: &CancelSignal,
        reference: &PolicyRef,
        node: &NodeName,
    ) -> StatusResult<()> {
        self.wait_connected(cancel).await?;
        let key = self.layout.key_for(reference, node);
        self.store.delete(&key).await?;
        info!(policy = %reference, node = %node, "Deleted side-channel status");
        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for SideChannelPublisher {
    async fn publish(
        &self,
        cancel: &CancelSignal,
        target: &PublishTarget,
        pending: &mut NodeStatusSet,
    ) -> StatusResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        self.wait_connected(cancel).await?;

        let nodes: Vec<NodeName> = pending.keys().cloned().collect();
        for node in nodes {
            let Some(status) = pending.get(&node) else {
                continue;
            };
            let key = self.layout.key_for(&target.reference, &node);
            let value = serde_json::to_vec(status).map_err(BackendError::from)?;
            self.store.put(&key, value).await?;

            debug!(policy = %target.reference, node = %node, key = %key, "Wrote side-channel status");
            pending.remove(&node);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "side-channel"
    }
}
