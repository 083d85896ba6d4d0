//! # Netpol Backend - Storage Contracts
//!
//! Everything the control plane needs from its environment, expressed as
//! capability traits so the synthesis and status components never depend on
//! a concrete API client:
//!
//! - [`PolicyBackend`]: versioned CRUD on policy objects, status-only
//!   updates and status JSON patches, gated by [`BackendCapabilities`]
//! - [`PolicyCache`]: the agent's local copy of policy objects
//! - [`SideStore`]: key-value store used as an alternative status channel
//! - [`ConflictGuard`]: refuses writes computed for an object that has since
//!   been recreated under the same name
//! - [`CancelSignal`]: cooperative cancellation observed at every blocking
//!   step
//!
//! In-memory implementations of each trait are provided for development
//! and testing.

pub mod backend;
pub mod cache;
pub mod cancel;
pub mod error;
pub mod guard;
pub mod memory;
pub mod patch;
pub mod side_store;

pub use backend::{BackendCapabilities, PolicyBackend};
pub use cache::{InMemoryPolicyCache, PolicyCache};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use error::{BackendError, BackendResult};
pub use guard::ConflictGuard;
pub use memory::{BackendOp, InMemoryPolicyBackend};
pub use patch::{apply_patch, escape_segment, node_status_path, PatchOperation, STATUS_PATH};
pub use side_store::{InMemorySideStore, SideStore};
