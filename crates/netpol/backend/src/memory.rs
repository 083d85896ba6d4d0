//! In-memory policy backend for development and testing.
//!
//! Implements optimistic versioning, capability-gated status writes and
//! atomic status patches. Failures can be injected per operation, and every
//! call is counted so tests can assert on the exact write pattern.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use netpol_types::{PolicyObject, PolicyRef, PolicyStatus, PolicyUid, ResourceVersion};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::backend::{BackendCapabilities, PolicyBackend};
use crate::error::{BackendError, BackendResult};
use crate::patch::{apply_patch, PatchOperation};

/// Backend operation, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Get,
    Create,
    Update,
    UpdateStatus,
    Patch,
}

struct Fault {
    op: BackendOp,
    /// Calls of `op` that still succeed before this fault fires.
    skip: usize,
    error: BackendError,
}

/// In-memory policy backend
pub struct InMemoryPolicyBackend {
    capabilities: BackendCapabilities,

    objects: DashMap<PolicyRef, PolicyObject>,

    /// Errors to return from upcoming calls, consumed in order per operation.
    faults: Mutex<VecDeque<Fault>>,

    calls: Mutex<HashMap<BackendOp, usize>>,

    /// Every patch request received, including failed ones.
    patch_log: Mutex<Vec<Vec<PatchOperation>>>,
}

impl InMemoryPolicyBackend {
    pub fn new(capabilities: BackendCapabilities) -> Self {
        Self {
            capabilities,
            objects: DashMap::new(),
            faults: Mutex::new(VecDeque::new()),
            calls: Mutex::new(HashMap::new()),
            patch_log: Mutex::new(Vec::new()),
        }
    }

    /// Store an object directly, bypassing versioning. Assigns a UID if the
    /// object has none and returns the stored copy.
    pub fn insert(&self, mut policy: PolicyObject) -> PolicyObject {
        if policy.metadata.uid.is_unassigned() {
            policy.metadata.uid = PolicyUid::generate();
        }
        if policy.metadata.resource_version.is_unversioned() {
            policy.metadata.resource_version = ResourceVersion::new(1);
        }
        self.objects.insert(policy.reference(), policy.clone());
        policy
    }

    /// Current stored copy of an object.
    pub fn stored(&self, reference: &PolicyRef) -> Option<PolicyObject> {
        self.objects.get(reference).map(|entry| entry.clone())
    }

    pub fn remove(&self, reference: &PolicyRef) -> Option<PolicyObject> {
        self.objects.remove(reference).map(|(_, policy)| policy)
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: BackendOp, error: BackendError) {
        self.fail_after(op, 0, error);
    }

    /// Let `skip` calls of `op` succeed, then fail the following one.
    pub fn fail_after(&self, op: BackendOp, skip: usize, error: BackendError) {
        self.faults.lock().push_back(Fault { op, skip, error });
    }

    /// Number of calls received for `op`.
    pub fn calls(&self, op: BackendOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Patch requests received so far.
    pub fn patch_requests(&self) -> Vec<Vec<PatchOperation>> {
        self.patch_log.lock().clone()
    }

    fn begin(&self, op: BackendOp) -> BackendResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let mut faults = self.faults.lock();
        let Some(index) = faults.iter().position(|fault| fault.op == op) else {
            return Ok(());
        };
        if faults[index].skip > 0 {
            faults[index].skip -= 1;
            return Ok(());
        }
        match faults.remove(index) {
            Some(fault) => {
                debug!(op = ?op, error = %fault.error, "Injected backend failure");
                Err(fault.error)
            }
            None => Ok(()),
        }
    }

    fn check_version(stored: &PolicyObject, incoming: &PolicyObject) -> BackendResult<()> {
        let expected = incoming.metadata.resource_version;
        let actual = stored.metadata.resource_version;
        let uid_changed =
            !incoming.metadata.uid.is_unassigned() && incoming.metadata.uid != stored.metadata.uid;

        if uid_changed || (!expected.is_unversioned() && expected != actual) {
            return Err(BackendError::Conflict {
                policy: stored.reference().to_string(),
                expected: expected.get(),
                actual: actual.get(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryPolicyBackend {
    fn default() -> Self {
        Self::new(BackendCapabilities::full())
    }
}

#[async_trait]
impl PolicyBackend for InMemoryPolicyBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn get(&self, reference: &PolicyRef) -> BackendResult<Option<PolicyObject>> {
        self.begin(BackendOp::Get)?;
        Ok(self.stored(reference))
    }

    async fn create(&self, mut policy: PolicyObject) -> BackendResult<PolicyObject> {
        self.begin(BackendOp::Create)?;

        let reference = policy.reference();
        match self.objects.entry(reference) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(BackendError::AlreadyExists(entry.key().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                if policy.metadata.uid.is_unassigned() {
                    policy.metadata.uid = PolicyUid::generate();
                }
                policy.metadata.resource_version = ResourceVersion::new(1);
                entry.insert(policy.clone());
                Ok(policy)
            }
        }
    }

    async fn update(&self, policy: PolicyObject) -> BackendResult<PolicyObject> {
        self.begin(BackendOp::Update)?;

        let reference = policy.reference();
        let mut stored = self
            .objects
            .get_mut(&reference)
            .ok_or_else(|| BackendError::NotFound(reference.to_string()))?;
        Self::check_version(&stored, &policy)?;

        let version = stored.metadata.resource_version.next();
        let uid = stored.metadata.uid;
        let status = stored.status.take();

        *stored = policy;
        stored.metadata.uid = uid;
        stored.metadata.resource_version = version;
        if self.capabilities.status_subresource {
            // With a status subresource, whole-object writes cannot touch status.
            stored.status = status;
        }
        Ok(stored.clone())
    }

    async fn update_status(&self, policy: PolicyObject) -> BackendResult<PolicyObject> {
        self.begin(BackendOp::UpdateStatus)?;
        if !self.capabilities.status_subresource {
            return Err(BackendError::Unsupported("status subresource".to_string()));
        }

        let reference = policy.reference();
        let mut stored = self
            .objects
            .get_mut(&reference)
            .ok_or_else(|| BackendError::NotFound(reference.to_string()))?;
        Self::check_version(&stored, &policy)?;

        stored.status = policy.status;
        stored.metadata.resource_version = stored.metadata.resource_version.next();
        Ok(stored.clone())
    }

    async fn patch_status(
        &self,
        reference: &PolicyRef,
        ops: &[PatchOperation],
    ) -> BackendResult<()> {
        self.patch_log.lock().push(ops.to_vec());
        self.begin(BackendOp::Patch)?;
        if !self.capabilities.patch {
            return Err(BackendError::Unsupported("json patch".to_string()));
        }
        if let Some(op) = ops.iter().find(|op| !op.path().starts_with("/status")) {
            return Err(BackendError::InvalidPatch(format!(
                "path {} is outside the status subresource",
                op.path()
            )));
        }

        let mut stored = self
            .objects
            .get_mut(reference)
            .ok_or_else(|| BackendError::NotFound(reference.to_string()))?;

        let mut doc = Map::new();
        if let Some(status) = &stored.status {
            doc.insert("status".to_string(), serde_json::to_value(status)?);
        }
        let mut doc = Value::Object(doc);
        apply_patch(&mut doc, ops)?;

        let status = match doc.get("status") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<PolicyStatus>(value.clone())
                    .map_err(|e| BackendError::InvalidPatch(e.to_string()))?,
            ),
        };

        stored.status = status;
        stored.metadata.resource_version = stored.metadata.resource_version.next();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{node_status_path, STATUS_PATH};
    use netpol_types::{NodeName, NodeStatus, Rule};

    fn policy() -> PolicyObject {
        PolicyObject::namespaced("prod", "web", vec![Rule::default()])
    }

    #[tokio::test]
    async fn test_create_and_conflict() {
        let backend = InMemoryPolicyBackend::default();
        let created = backend.create(policy()).await.unwrap();
        assert_eq!(created.metadata.resource_version.get(), 1);

        let err = backend.create(policy()).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));

        let mut stale = created.clone();
        backend.update(created).await.unwrap();
        stale.specs.clear();
        let err = backend.update(stale).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_update_ignores_status_with_subresource() {
        let backend = InMemoryPolicyBackend::new(BackendCapabilities::status_only());
        let mut stored = backend.insert(policy());
        stored
            .status_or_default()
            .set_node_status(NodeName::new("n1"), NodeStatus::enforced(1));

        let updated = backend.update(stored.clone()).await.unwrap();
        assert!(updated.status.is_none());

        let mut with_status = updated.clone();
        with_status.status = stored.status.clone();
        let updated = backend.update_status(with_status).await.unwrap();
        assert!(updated.status.is_some());
        assert_eq!(backend.calls(BackendOp::UpdateStatus), 1);
    }

    #[tokio::test]
    async fn test_update_writes_status_without_subresource() {
        let backend = InMemoryPolicyBackend::new(BackendCapabilities::none());
        let mut stored = backend.insert(policy());
        stored
            .status_or_default()
            .set_node_status(NodeName::new("n1"), NodeStatus::enforced(1));

        let updated = backend.update(stored).await.unwrap();
        assert!(updated.status.is_some());

        let err = backend.update_status(updated).await.unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_patch_status() {
        let backend = InMemoryPolicyBackend::default();
        let stored = backend.insert(policy());
        let reference = stored.reference();

        let status = NodeStatus::enforced(2);
        let ops = vec![
            PatchOperation::Test {
                path: STATUS_PATH.into(),
                value: Value::Null,
            },
            PatchOperation::Add {
                path: STATUS_PATH.into(),
                value: serde_json::json!({
                    "nodes": { "n1": serde_json::to_value(&status).unwrap() }
                }),
            },
        ];
        backend.patch_status(&reference, &ops).await.unwrap();
        assert!(backend.patch_status(&reference, &ops).await.is_err());

        let replace = vec![PatchOperation::Replace {
            path: node_status_path(&NodeName::new("n2")),
            value: serde_json::to_value(NodeStatus::enforced(3)).unwrap(),
        }];
        backend.patch_status(&reference, &replace).await.unwrap();

        let stored = backend.stored(&reference).unwrap();
        let nodes = &stored.status.unwrap().nodes;
        assert_eq!(nodes[&NodeName::new("n1")], status);
        assert_eq!(nodes[&NodeName::new("n2")].revision, 3);
        assert_eq!(backend.calls(BackendOp::Patch), 3);
        assert_eq!(backend.patch_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_injected_fault_consumed_once() {
        let backend = InMemoryPolicyBackend::default();
        let stored = backend.insert(policy());
        backend.fail_next(
            BackendOp::Get,
            BackendError::Unavailable("connection reset".into()),
        );

        assert!(backend.get(&stored.reference()).await.is_err());
        assert!(backend.get(&stored.reference()).await.unwrap().is_some());
        assert_eq!(backend.calls(BackendOp::Get), 2);
    }
}
