//! Policy backend contract
//!
//! The backend stores policy objects with optimistic versioning. Which
//! atomic update primitives it offers is discovered once per session and
//! reported through [`BackendCapabilities`].

use async_trait::async_trait;
use netpol_types::{PolicyObject, PolicyRef};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};
use crate::patch::PatchOperation;

/// Update primitives offered by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// JSON patch against the status subresource.
    pub patch: bool,

    /// Dedicated status-only update call.
    pub status_subresource: bool,
}

impl BackendCapabilities {
    /// Patch and status subresource support.
    pub fn full() -> Self {
        Self {
            patch: true,
            status_subresource: true,
        }
    }

    /// Status subresource without patch support.
    pub fn status_only() -> Self {
        Self {
            patch: false,
            status_subresource: true,
        }
    }

    /// Neither primitive; only whole-object writes.
    pub fn none() -> Self {
        Self::default()
    }
}

/// CRUD access to policy objects
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    /// Capabilities of this backend.
    fn capabilities(&self) -> BackendCapabilities;

    /// Get an object, `None` if it does not exist.
    async fn get(&self, reference: &PolicyRef) -> BackendResult<Option<PolicyObject>>;

    /// Create an object. Fails if one exists under the same name.
    async fn create(&self, policy: PolicyObject) -> BackendResult<PolicyObject>;

    /// Replace an object. A non-zero resource version must match the stored
    /// one.
    async fn update(&self, policy: PolicyObject) -> BackendResult<PolicyObject>;

    /// Replace only the status of an object.
    async fn update_status(&self, policy: PolicyObject) -> BackendResult<PolicyObject>;

    /// Apply a JSON patch to the status subresource, atomically.
    async fn patch_status(&self, reference: &PolicyRef, ops: &[PatchOperation])
        -> BackendResult<()>;

    /// Get an object that must exist.
    async fn fetch(&self, reference: &PolicyRef) -> BackendResult<PolicyObject> {
        self.get(reference)
            .await?
            .ok_or_else(|| BackendError::NotFound(reference.to_string()))
    }
}
