//! Per-node enforcement status
//!
//! Every agent owns exactly one [`NodeStatus`] entry in a policy's
//! [`PolicyStatus`]. Writers only ever set their own entry; nothing in this
//! module removes an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::NodeName;

/// Annotation carrying the full last-applied object. It is never copied into
/// node statuses.
pub const LAST_APPLIED_CONFIG_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// One agent's report on a policy revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// All local endpoints enforce the reported revision.
    pub enforcing: bool,

    /// The policy was imported on the node.
    pub ok: bool,

    /// Most recent error seen for this node/policy pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Local policy revision. Only recorded when no error is reported.
    #[serde(default, rename = "localPolicyRevision")]
    pub revision: u64,

    pub last_updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl NodeStatus {
    /// Build a status from an enforcement outcome.
    pub fn from_outcome(
        enforcing: bool,
        ok: bool,
        error: Option<String>,
        revision: u64,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        let revision = if error.is_some() { 0 } else { revision };
        Self {
            enforcing,
            ok,
            error,
            revision,
            last_updated: Utc::now(),
            annotations: strip_annotations(annotations),
        }
    }

    /// Status of a node that enforces `revision`.
    pub fn enforced(revision: u64) -> Self {
        Self::from_outcome(true, true, None, revision, BTreeMap::new())
    }

    /// Status of a node that failed with `error`.
    pub fn failed(ok: bool, error: impl Into<String>) -> Self {
        Self::from_outcome(false, ok, Some(error.into()), 0, BTreeMap::new())
    }

    pub fn is_healthy(&self) -> bool {
        self.enforcing && self.ok && self.error.is_none()
    }
}

/// Drop annotations that must not be replicated into every node entry.
pub fn strip_annotations(mut annotations: BTreeMap<String, String>) -> BTreeMap<String, String> {
    annotations.remove(LAST_APPLIED_CONFIG_ANNOTATION);
    annotations
}

/// Pending node statuses keyed by node name
pub type NodeStatusSet = BTreeMap<NodeName, NodeStatus>;

/// Status map of a policy object.
///
/// Holds the per-node enforcement outcomes reported by agents and, for
/// parents of derivative policies, the outcome of each derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub nodes: NodeStatusSet,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub derivative_policies: BTreeMap<String, NodeStatus>,
}

impl PolicyStatus {
    /// Status map containing only the given entries.
    pub fn with_nodes(nodes: NodeStatusSet) -> Self {
        Self {
            nodes,
            derivative_policies: BTreeMap::new(),
        }
    }

    /// Set or overwrite the entry owned by `node`. Other entries are left
    /// untouched.
    pub fn set_node_status(&mut self, node: NodeName, status: NodeStatus) {
        self.nodes.insert(node, status);
    }

    /// Apply every entry of `pending`.
    pub fn apply(&mut self, pending: &NodeStatusSet) {
        for (node, status) in pending {
            self.set_node_status(node.clone(), status.clone());
        }
    }

    pub fn node_status(&self, node: &NodeName) -> Option<&NodeStatus> {
        self.nodes.get(node)
    }

    /// Record the outcome of deriving `derivative_name` from this policy.
    pub fn set_derivative_status(&mut self, derivative_name: impl Into<String>, status: NodeStatus) {
        self.derivative_policies.insert(derivative_name.into(), status);
    }

    pub fn derivative_status(&self, derivative_name: &str) -> Option<&NodeStatus> {
        self.derivative_policies.get(derivative_name)
    }

    /// Aggregate view over all node entries.
    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary {
            nodes: self.nodes.len(),
            ..Default::default()
        };
        for status in self.nodes.values() {
            if status.enforcing {
                summary.enforcing += 1;
            }
            if status.ok {
                summary.ok += 1;
            }
            if status.error.is_some() {
                summary.failing += 1;
            }
        }
        summary
    }
}

/// Counts over a policy's node entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub nodes: usize,
    pub enforcing: usize,
    pub ok: usize,
    pub failing: usize,
}

impl StatusSummary {
    /// Every reporting node enforces the policy without error.
    pub fn fully_enforced(&self) -> bool {
        self.nodes > 0 && self.enforcing == self.nodes && self.failing == 0
    }
}
