//! # Netpol Derivative - Derivative Policy Synthesis
//!
//! Policies whose egress rules reference externally managed groups cannot be
//! enforced as written. This crate expands them into a derivative child
//! policy holding concrete rules:
//!
//! 1. [`classify`] flags the rules that require derivation
//! 2. [`DerivativeSynthesizer`] builds the child with a deterministic name, an
//!    owner reference to the parent, and deny-all placeholders that are
//!    replaced in place once a [`RuleResolver`] resolves them
//! 3. [`DerivativeLifecycle`] creates or overwrites the child
//! 4. [`DerivativeController`] runs the three steps and records the outcome
//!    on the parent's status
//!
//! The child is fail-closed at every point: a rule that has not resolved
//! yet denies all egress instead of allowing it.

pub mod classifier;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod resolver;
pub mod synthesizer;

pub use classifier::{classify, classify_policy, needs_derivation, ClassifiedRule, RuleClass};
pub use controller::DerivativeController;
pub use error::{DerivativeError, DerivativeResult, ResolutionError, SynthesisError};
pub use lifecycle::DerivativeLifecycle;
pub use resolver::{GroupProvider, GroupResolver, RuleResolver, StaticGroup, StaticGroupProvider};
pub use synthesizer::{
    derivative_name, is_derivative, DerivativeSynthesizer, DERIVATIVE_KIND, PARENT_UID_LABEL,
    POLICY_KIND_LABEL,
};
