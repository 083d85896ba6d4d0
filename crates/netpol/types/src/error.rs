//! Error types for netpol-types.

use thiserror::Error;

/// A policy's rule set could not be parsed.
///
/// Parse failures are permanent: retrying the same object yields the same
/// error until the policy author edits it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The policy carries no rules.
    #[error("policy {policy} has no rules")]
    Empty { policy: String },

    /// A namespaced policy without a namespace.
    #[error("namespaced policy {policy} has no namespace")]
    MissingNamespace { policy: String },

    /// A cluster-scoped policy that carries a namespace.
    #[error("cluster-scoped policy {policy} must not carry namespace {namespace}")]
    UnexpectedNamespace { policy: String, namespace: String },

    /// One rule failed validation.
    #[error("invalid rule {index} in policy {policy}: {reason}")]
    InvalidRule {
        policy: String,
        index: usize,
        reason: String,
    },
}

/// Result type for parsing.
pub type ParseResult<T> = Result<T, ParseError>;
