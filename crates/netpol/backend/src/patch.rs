//! JSON patch operations against an object's status subresource
//!
//! Only the subset of RFC 6902 needed for status publication is modelled:
//! `test`, `add` and `replace`.

use netpol_types::NodeName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, BackendResult};

/// Path of the whole status map
pub const STATUS_PATH: &str = "/status";

/// A single JSON patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Test { path: String, value: Value },
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Test { path, .. }
            | PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. } => path,
        }
    }
}

/// Path of one node's entry in the status map.
pub fn node_status_path(node: &NodeName) -> String {
    format!("{}/nodes/{}", STATUS_PATH, escape_segment(node.as_str()))
}

/// Escape a raw key for use as a JSON pointer segment.
pub fn escape_segment(raw: &str) -> String {
    raw.replace('~', "~0").replace('/', "~1")
}

fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Apply `ops` to `doc` atomically: either every operation applies or
/// `doc` is left unchanged.
///
/// `add` and `replace` both set the addressed member; the containing
/// object must already exist.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOperation]) -> BackendResult<()> {
    let mut working = doc.clone();
    for op in ops {
        match op {
            PatchOperation::Test { path, value } => {
                let current = working.pointer(path).unwrap_or(&Value::Null);
                if current != value {
                    return Err(BackendError::TestFailed { path: path.clone() });
                }
            }
            PatchOperation::Add { path, value } | PatchOperation::Replace { path, value } => {
                set_member(&mut working, path, value.clone())?;
            }
        }
    }
    *doc = working;
    Ok(())
}

fn set_member(doc: &mut Value, path: &str, value: Value) -> BackendResult<()> {
    let (parent, last) = path
        .rsplit_once('/')
        .ok_or_else(|| BackendError::InvalidPatch(format!("malformed path {:?}", path)))?;

    let container = if parent.is_empty() {
        Some(doc)
    } else {
        doc.pointer_mut(parent)
    };

    match container {
        Some(Value::Object(map)) => {
            map.insert(unescape_segment(last), value);
            Ok(())
        }
        _ => Err(BackendError::InvalidPatch(format!(
            "parent of {} does not exist",
            path
        ))),
    }
}
