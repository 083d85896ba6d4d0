//! Status publish strategies
//!
//! One strategy is selected per session from the backend capabilities, or
//! the side channel when it is enabled. Every strategy only sets the entries
//! it is given and never touches other nodes' entries.

pub mod patch;
pub mod side_channel;
pub mod subresource;
pub mod update;

pub use patch::PatchPublisher;
pub use side_channel::{KeyLayout, SideChannelPublisher};
pub use subresource::StatusSubresourcePublisher;
pub use update::FullUpdatePublisher;

use std::sync::Arc;

use async_trait::async_trait;
use netpol_backend::{CancelSignal, ConflictGuard, PolicyBackend, SideStore};
use netpol_types::{NodeStatusSet, PolicyObject, PolicyRef, PolicyUid};
use tracing::info;

use crate::config::StatusConfig;
use crate::error::{StatusError, StatusResult};

/// The policy whose status is being published
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub reference: PolicyRef,

    /// UID the statuses were computed for. `None` skips the identity check.
    pub uid: Option<PolicyUid>,

    /// Copy of the object to mutate instead of fetching the live one.
    pub object: Option<PolicyObject>,
}

impl PublishTarget {
    /// Target for `policy`, using it as the object to mutate.
    pub fn for_object(policy: &PolicyObject) -> Self {
        Self {
            reference: policy.reference(),
            uid: (!policy.uid().is_unassigned()).then(|| policy.uid()),
            object: Some(policy.clone()),
        }
    }

    /// Target known only by reference: the live object is fetched and its
    /// identity is not checked.
    pub fn by_reference(reference: PolicyRef) -> Self {
        Self {
            reference,
            uid: None,
            object: None,
        }
    }

    /// Same target, forcing a fetch of the live object.
    pub fn without_object(&self) -> Self {
        Self {
            object: None,
            ..self.clone()
        }
    }
}

/// Writes pending node statuses for a policy
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish `pending`. Entries are removed from `pending` as they are
    /// written; on error the remaining entries are still pending.
    async fn publish(
        &self,
        cancel: &CancelSignal,
        target: &PublishTarget,
        pending: &mut NodeStatusSet,
    ) -> StatusResult<()>;

    /// Strategy name for logging and metrics
    fn name(&self) -> &'static str;
}

/// Live object for `target`, checked against the target's UID.
pub(crate) async fn live_object(
    backend: &dyn PolicyBackend,
    guard: &ConflictGuard,
    target: &PublishTarget,
) -> StatusResult<PolicyObject> {
    let live = match &target.object {
        Some(object) => object.clone(),
        None => backend.fetch(&target.reference).await?,
    };
    if let Some(uid) = target.uid {
        guard.verify(&live, uid)?;
    }
    Ok(live)
}

/// Factory for the publisher matching `config` and the backend capabilities
pub fn select_publisher(
    config: &StatusConfig,
    backend: Option<Arc<dyn PolicyBackend>>,
    side_store: Option<Arc<dyn SideStore>>,
    guard: ConflictGuard,
) -> StatusResult<Arc<dyn StatusPublisher>> {
    let publisher: Arc<dyn StatusPublisher> = if config.side_channel.enabled {
        let store = side_store.ok_or_else(|| {
            StatusError::InvalidConfig("side channel enabled without a side store".to_string())
        })?;
        Arc::new(SideChannelPublisher::new(
            store,
            KeyLayout::from_config(&config.side_channel),
        ))
    } else {
        let backend = backend.ok_or_else(|| {
            StatusError::InvalidConfig("no policy backend configured".to_string())
        })?;
        let capabilities = backend.capabilities();
        if capabilities.patch {
            Arc::new(PatchPublisher::new(backend, config.max_patch_operations))
        } else if capabilities.status_subresource {
            Arc::new(StatusSubresourcePublisher::new(backend, guard))
        } else {
            Arc::new(FullUpdatePublisher::new(backend, guard))
        }
    };

    info!(strategy = publisher.name(), "Selected status publish strategy");
    Ok(publisher)
}
