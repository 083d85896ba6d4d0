//! CLI command implementations

pub mod classify;
pub mod derive;
pub mod status_key;

use std::path::Path;

use anyhow::Context;
use netpol_types::{PolicyObject, PolicyScope};

/// Read a policy object from a JSON file.
pub fn load_policy(path: &Path) -> anyhow::Result<PolicyObject> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read policy file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("invalid policy file {}", path.display()))
}

/// Scope to parse `policy` under: its own kind unless forced cluster-scoped.
pub fn scope_of(policy: &PolicyObject, cluster_scoped: bool) -> PolicyScope {
    if cluster_scoped {
        PolicyScope::ClusterScoped
    } else {
        policy.kind.scope()
    }
}
