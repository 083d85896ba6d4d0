//! Derivative error types

use netpol_backend::BackendError;
use netpol_types::{ParseError, PolicyObject};
use thiserror::Error;

/// A single rule could not be resolved into a concrete rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("No group provider registered for {0}")]
    UnknownProvider(String),

    #[error("Group {group} could not be resolved: {reason}")]
    Group { group: String, reason: String },
}

/// Derivative pipeline errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DerivativeError {
    /// The parent's rules do not parse. Permanent until the parent is edited.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// One rule of the parent could not be resolved.
    #[error("Rule {index} could not be resolved: {source}")]
    Resolution {
        index: usize,
        #[source]
        source: ResolutionError,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Derivation cancelled")]
    Cancelled,
}

/// Synthesis failure, carrying whatever part of the derivative was built.
///
/// `partial` is `None` when nothing could be built (parse failure), and
/// otherwise holds a deny-closed derivative whose unresolved rules are still
/// placeholders.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct SynthesisError {
    pub partial: Option<Box<PolicyObject>>,
    #[source]
    pub cause: DerivativeError,
}

impl SynthesisError {
    pub fn new(partial: Option<PolicyObject>, cause: DerivativeError) -> Self {
        Self {
            partial: partial.map(Box::new),
            cause,
        }
    }
}

/// Result type for derivative operations
pub type DerivativeResult<T> = std::result::Result<T, DerivativeError>;
