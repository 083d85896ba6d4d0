//! End-to-end derivation against the in-memory backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netpol_backend::{cancel_pair, BackendOp, CancelSignal, InMemoryPolicyBackend};
use netpol_derivative::{
    derivative_name, DerivativeController, DerivativeError, DerivativeSynthesizer, GroupResolver,
    ResolutionError, RuleResolver, StaticGroupProvider,
};
use netpol_types::{
    EgressRule, GroupRef, PolicyObject, PolicyRef, PolicyScope, Rule, Selector, StandardParser,
};

fn db_group() -> GroupRef {
    GroupRef::new("static").with_attribute("name", "db")
}

/// Parent with rules `[X, Y, Z]` where only `Y` references a group.
fn parent() -> PolicyObject {
    let x = Rule::for_endpoints(Selector::any().with_label("app", "x"));
    let y = Rule::for_endpoints(Selector::any().with_label("app", "y")).with_egress(EgressRule {
        to_groups: vec![db_group()],
        ..Default::default()
    });
    let z = Rule::for_endpoints(Selector::any().with_label("app", "z")).with_egress(EgressRule {
        to_cidr: vec!["192.0.2.0/24".to_string()],
        ..Default::default()
    });
    PolicyObject::namespaced("prod", "mixed", vec![x, y, z])
}

fn app(rule: &Rule) -> Option<&str> {
    rule.endpoint_selector.as_ref().and_then(|s| s.label("app"))
}

#[tokio::test]
async fn test_derivative_is_deny_closed_then_resolved() {
    let backend = Arc::new(InMemoryPolicyBackend::default());
    let parent = backend.insert(parent());
    let provider = Arc::new(StaticGroupProvider::new("static"));

    let synthesizer = DerivativeSynthesizer::new(
        Arc::new(StandardParser),
        Arc::new(GroupResolver::new().with_provider(provider.clone())),
    );
    let controller = DerivativeController::new(synthesizer, backend.clone());
    let reference = PolicyRef::namespaced("prod", derivative_name(parent.name(), parent.uid()));

    // Group not resolvable yet: the derivative is created deny-closed.
    let err = controller
        .reconcile(&CancelSignal::never(), &parent, PolicyScope::Namespaced)
        .await
        .unwrap_err();
    assert!(matches!(err, DerivativeError::Resolution { index: 1, .. }));

    let created = backend.stored(&reference).unwrap();
    assert_eq!(created.specs.len(), 3);
    assert_eq!(app(&created.specs[0]), Some("x"));
    assert!(created.specs[1].is_deny_all_egress());
    assert_eq!(app(&created.specs[1]), Some("y"));
    assert_eq!(app(&created.specs[2]), Some("z"));
    assert_eq!(
        created.specs[2].egress.as_ref().unwrap()[0].to_cidr,
        vec!["192.0.2.0/24"]
    );

    // Once the group resolves, the placeholder is replaced in place.
    provider.insert(db_group(), vec!["10.9.8.7".parse().unwrap()]);
    controller
        .reconcile(&CancelSignal::never(), &parent, PolicyScope::Namespaced)
        .await
        .unwrap();

    let resolved = backend.stored(&reference).unwrap();
    assert_eq!(resolved.uid(), created.uid());
    assert_eq!(app(&resolved.specs[0]), Some("x"));
    assert_eq!(
        resolved.specs[1].egress.as_ref().unwrap()[0].to_cidr,
        vec!["10.9.8.7/32"]
    );
    assert_eq!(resolved.specs[2], created.specs[2]);
    assert_eq!(backend.calls(BackendOp::Create), 1);

    let status = backend.stored(&parent.reference()).unwrap().status.unwrap();
    assert!(status.derivative_status(&reference.name).unwrap().ok);
}

/// Resolver that never answers.
struct StalledResolver;

#[async_trait]
impl RuleResolver for StalledResolver {
    async fn resolve(&self, _rule: &Rule) -> Result<Rule, ResolutionError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_pending_resolution_is_fail_closed() {
    let synthesizer = DerivativeSynthesizer::new(Arc::new(StandardParser), Arc::new(StalledResolver));
    let parent = parent();
    let (handle, signal) = cancel_pair();

    let task = tokio::spawn(async move {
        synthesizer
            .synthesize(&signal, &parent, PolicyScope::Namespaced)
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!task.is_finished());

    handle.cancel();
    let err = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();

    assert!(matches!(err.cause, DerivativeError::Cancelled));
    let partial = err.partial.unwrap();
    assert!(partial.specs[1].is_deny_all_egress());
    assert!(!partial.specs[0].is_deny_all_egress());
    assert!(!partial.specs[2].is_deny_all_egress());
}

#[tokio::test]
async fn test_cancelled_reconcile_writes_nothing() {
    let backend = Arc::new(InMemoryPolicyBackend::default());
    let parent = backend.insert(parent());
    let synthesizer = DerivativeSynthesizer::new(Arc::new(StandardParser), Arc::new(StalledResolver));
    let controller = DerivativeController::new(synthesizer, backend.clone());

    let (handle, signal) = cancel_pair();
    handle.cancel();
    let err = controller
        .reconcile(&signal, &parent, PolicyScope::Namespaced)
        .await
        .unwrap_err();

    assert_eq!(err, DerivativeError::Cancelled);
    assert_eq!(backend.calls(BackendOp::Create), 0);
    assert_eq!(backend.calls(BackendOp::UpdateStatus), 0);
}
