//! # Netpol Status - Per-Node Status Reconciliation
//!
//! Every agent reports whether it enforces a policy revision by writing its
//! own entry into the policy's status map. Many agents write the same map
//! concurrently, against a backend whose atomic primitives vary:
//!
//! - [`StatusReconciler`]: waits for local enforcement, then publishes with
//!   bounded, cancellable retries and cluster-scaled backoff
//! - [`select_publisher`]: picks a [`StatusPublisher`] once per session from
//!   the backend capabilities (JSON patch, status subresource or full
//!   update), or the side channel when enabled
//! - [`StatusRelay`]: operator-side consumer that moves side-channel
//!   statuses into the primary backend
//!
//! No strategy ever removes or rewrites another node's entry.

pub mod backoff;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod strategy;

pub use backoff::{ClusterSizeSource, ExponentialBackoff, FixedClusterSize};
pub use config::{BackoffConfig, SideChannelConfig, StatusConfig};
pub use driver::{EnforcementWaiter, StatusReconciler, StatusReconcilerBuilder};
pub use error::{StatusError, StatusResult};
pub use metrics::StatusMetrics;
pub use relay::StatusRelay;
pub use strategy::{
    select_publisher, FullUpdatePublisher, KeyLayout, PatchPublisher, PublishTarget,
    SideChannelPublisher, StatusPublisher, StatusSubresourcePublisher,
};
