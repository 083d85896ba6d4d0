//! Policy objects as stored in the backend

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::{PolicyUid, ResourceVersion};
use crate::rule::Rule;
use crate::status::PolicyStatus;

/// API group/version of every policy kind
pub const API_VERSION: &str = "netpol.io/v2";

/// Whether a policy lives in a namespace or applies cluster-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyScope {
    Namespaced,
    ClusterScoped,
}

impl PolicyScope {
    pub fn from_cluster_scoped(cluster_scoped: bool) -> Self {
        if cluster_scoped {
            PolicyScope::ClusterScoped
        } else {
            PolicyScope::Namespaced
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, PolicyScope::ClusterScoped)
    }

    /// Object kind carrying policies of this scope.
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicyScope::Namespaced => PolicyKind::NetworkPolicy,
            PolicyScope::ClusterScoped => PolicyKind::ClusterwideNetworkPolicy,
        }
    }
}

/// Kind of a policy object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PolicyKind {
    #[default]
    NetworkPolicy,
    ClusterwideNetworkPolicy,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::NetworkPolicy => "NetworkPolicy",
            PolicyKind::ClusterwideNetworkPolicy => "ClusterwideNetworkPolicy",
        }
    }

    pub fn scope(&self) -> PolicyScope {
        match self {
            PolicyKind::NetworkPolicy => PolicyScope::Namespaced,
            PolicyKind::ClusterwideNetworkPolicy => PolicyScope::ClusterScoped,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a policy object in the backend: kind, namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRef {
    pub kind: PolicyKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl PolicyRef {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: PolicyKind::NetworkPolicy,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            kind: PolicyKind::ClusterwideNetworkPolicy,
            namespace: None,
            name: name.into(),
        }
    }

    /// Namespace, or the empty string for cluster-scoped objects.
    pub fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Back-reference from a generated object to the object that owns it.
///
/// Used for lookup and for cascading deletion by an external garbage
/// collector; it is never dereferenced as a live object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: PolicyKind,
    pub name: String,
    pub uid: PolicyUid,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: PolicyUid,
    #[serde(default)]
    pub resource_version: ResourceVersion,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

/// The rule-bearing resource managed by this system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyObject {
    #[serde(default)]
    pub kind: PolicyKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub specs: Vec<Rule>,
    /// `None` until the first status write creates the status map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PolicyStatus>,
}

impl PolicyObject {
    /// New namespaced policy with a freshly generated UID.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>, specs: Vec<Rule>) -> Self {
        Self {
            kind: PolicyKind::NetworkPolicy,
            metadata: ObjectMeta {
                name: name.into(),
                namespace: Some(namespace.into()),
                uid: PolicyUid::generate(),
                ..Default::default()
            },
            specs,
            status: None,
        }
    }

    /// New cluster-scoped policy with a freshly generated UID.
    pub fn cluster_scoped(name: impl Into<String>, specs: Vec<Rule>) -> Self {
        Self {
            kind: PolicyKind::ClusterwideNetworkPolicy,
            metadata: ObjectMeta {
                name: name.into(),
                uid: PolicyUid::generate(),
                ..Default::default()
            },
            specs,
            status: None,
        }
    }

    pub fn reference(&self) -> PolicyRef {
        PolicyRef {
            kind: self.kind,
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> PolicyUid {
        self.metadata.uid
    }

    /// Copy of this object carried under the kind matching `scope`.
    ///
    /// Watch caches may hand cluster-scoped policies over under the
    /// namespaced kind; parsing such a copy as-is would apply namespaced
    /// semantics to a cluster-wide policy.
    pub fn rewrap(&self, scope: PolicyScope) -> Self {
        let mut copy = self.clone();
        copy.kind = scope.kind();
        copy
    }

    pub fn status_or_default(&mut self) -> &mut PolicyStatus {
        self.status.get_or_insert_with(PolicyStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_display() {
        let policy = PolicyObject::namespaced("prod", "allow-dns", vec![]);
        assert_eq!(policy.reference().to_string(), "NetworkPolicy/prod/allow-dns");

        let policy = PolicyObject::cluster_scoped("baseline", vec![]);
        assert_eq!(
            policy.reference().to_string(),
            "ClusterwideNetworkPolicy/baseline"
        );
        assert_eq!(policy.reference().namespace_or_empty(), "");
    }

    #[test]
    fn test_rewrap_changes_kind_only() {
        let policy = PolicyObject::cluster_scoped("baseline", vec![Rule::default()]);
        let mut slim = policy.clone();
        slim.kind = PolicyKind::NetworkPolicy;

        let rewrapped = slim.rewrap(PolicyScope::ClusterScoped);
        assert_eq!(rewrapped, policy);
    }

    #[test]
    fn test_status_absent_is_not_serialized() {
        let policy = PolicyObject::namespaced("ns", "p", vec![]);
        let json = serde_json::to_value(&policy).unwrap();
        assert!(json.get("status").is_none());
    }
}
