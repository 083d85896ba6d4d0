//! Backend error types

use netpol_types::PolicyUid;
use thiserror::Error;

/// Errors returned by the backend, the side store and the conflict guard
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Policy not found: {0}")]
    NotFound(String),

    #[error("Policy already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed; the write was based on a stale
    /// copy of the object.
    #[error("Conflict writing {policy}: expected version {expected}, stored version {actual}")]
    Conflict {
        policy: String,
        expected: u64,
        actual: u64,
    },

    /// A `test` patch operation did not match.
    #[error("Patch test failed at {path}")]
    TestFailed { path: String },

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Operation not supported by backend: {0}")]
    Unsupported(String),

    /// The live object is not the object being reconciled: it was deleted
    /// and recreated under the same name.
    #[error("Policy UID mismatch for {policy}: expected {expected}, found {actual}")]
    IdentityMismatch {
        policy: String,
        expected: PolicyUid,
        actual: PolicyUid,
    },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;
