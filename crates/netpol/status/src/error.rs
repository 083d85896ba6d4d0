//! Status reconciliation error types

use std::time::Duration;

use netpol_backend::BackendError;
use netpol_types::ParseError;
use thiserror::Error;

/// Status reconciliation errors
#[derive(Debug, Error)]
pub enum StatusError {
    /// The policy no longer parses. Reported once, never retried.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Policy revision {revision} not enforced within {timeout:?}")]
    EnforcementTimeout { revision: u64, timeout: Duration },

    #[error("Policy revision {revision} could not be enforced: {reason}")]
    EnforcementFailed { revision: u64, reason: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Status update cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid status key: {0}")]
    InvalidKey(String),

    #[error("Cannot decode node status: {0}")]
    Decode(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl StatusError {
    /// Whether the driver should retry the publish after a backoff.
    ///
    /// Every backend failure qualifies except an identity mismatch. Parse
    /// and enforcement failures are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            StatusError::Backend(err) => !matches!(err, BackendError::IdentityMismatch { .. }),
            _ => false,
        }
    }

    /// Whether the live object was recreated under the same name.
    pub fn is_identity_mismatch(&self) -> bool {
        matches!(self, StatusError::Backend(BackendError::IdentityMismatch { .. }))
    }
}

impl From<prometheus::Error> for StatusError {
    fn from(err: prometheus::Error) -> Self {
        StatusError::Metrics(err.to_string())
    }
}

/// Result type for status operations
pub type StatusResult<T> = std::result::Result<T, StatusError>;
