//! # Netpol Types - Policy Object Model
//!
//! Core types shared by the netpol control plane:
//!
//! - [`PolicyObject`]: a namespaced or cluster-scoped policy with its rules
//!   and status map
//! - [`Rule`]: a single rule; rules referencing groups require derivation
//! - [`PolicyStatus`] / [`NodeStatus`]: per-node enforcement outcomes, one
//!   entry per reporting agent
//! - [`PolicyParser`]: the scope-aware parsing capability, with
//!   [`StandardParser`] as the default implementation

pub mod error;
pub mod ids;
pub mod object;
pub mod parse;
pub mod rule;
pub mod status;

pub use error::{ParseError, ParseResult};
pub use ids::{NodeName, PolicyUid, ResourceVersion};
pub use object::{
    ObjectMeta, OwnerReference, PolicyKind, PolicyObject, PolicyRef, PolicyScope, API_VERSION,
};
pub use parse::{PolicyParser, StandardParser};
pub use rule::{EgressRule, GroupRef, IngressRule, PortRule, Protocol, Rule, Selector};
pub use status::{
    NodeStatus, NodeStatusSet, PolicyStatus, StatusSummary, LAST_APPLIED_CONFIG_ANNOTATION,
};
