//! Derivative policy synthesis
//!
//! Builds the child policy of a parent whose rules reference externally
//! resolved entities. The child mirrors the parent's rule list index by
//! index. Every rule requiring derivation is first written as a deny-all
//! egress placeholder, so the child is fail-closed before any resolution
//! starts, and is replaced in place once it resolves.

use std::collections::BTreeMap;
use std::sync::Arc;

use netpol_backend::CancelSignal;
use netpol_types::{
    ObjectMeta, OwnerReference, PolicyObject, PolicyParser, PolicyScope, PolicyUid, Rule,
    API_VERSION,
};
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClassifiedRule};
use crate::error::{DerivativeError, SynthesisError};
use crate::resolver::RuleResolver;

/// Label linking a derivative to its parent's UID
pub const PARENT_UID_LABEL: &str = "io.netpol.policy.parent.uid";

/// Label marking generated objects
pub const POLICY_KIND_LABEL: &str = "io.netpol.policy.kind";

/// Value of [`POLICY_KIND_LABEL`] on derivatives
pub const DERIVATIVE_KIND: &str = "derivative";

/// Name of the derivative of the parent `(name, uid)`.
pub fn derivative_name(parent_name: &str, parent_uid: PolicyUid) -> String {
    format!("{}-togroups-{}", parent_name, parent_uid)
}

/// Whether `policy` was generated by synthesis.
pub fn is_derivative(policy: &PolicyObject) -> bool {
    policy
        .metadata
        .labels
        .get(POLICY_KIND_LABEL)
        .is_some_and(|kind| kind == DERIVATIVE_KIND)
}

/// Builds derivative policies
pub struct DerivativeSynthesizer {
    parser: Arc<dyn PolicyParser>,
    resolver: Arc<dyn RuleResolver>,
}

impl DerivativeSynthesizer {
    pub fn new(parser: Arc<dyn PolicyParser>, resolver: Arc<dyn RuleResolver>) -> Self {
        Self { parser, resolver }
    }

    /// Empty derivative of `parent`: name, owner reference and labels.
    pub fn skeleton(parent: &PolicyObject, scope: PolicyScope) -> PolicyObject {
        let kind = scope.kind();

        let mut labels = BTreeMap::new();
        labels.insert(PARENT_UID_LABEL.to_string(), parent.uid().to_string());
        labels.insert(POLICY_KIND_LABEL.to_string(), DERIVATIVE_KIND.to_string());

        PolicyObject {
            kind,
            metadata: ObjectMeta {
                name: derivative_name(parent.name(), parent.uid()),
                namespace: match scope {
                    PolicyScope::Namespaced => parent.metadata.namespace.clone(),
                    PolicyScope::ClusterScoped => None,
                },
                labels,
                owner_references: vec![OwnerReference {
                    api_version: API_VERSION.to_string(),
                    kind,
                    name: parent.name().to_string(),
                    uid: parent.uid(),
                    block_owner_deletion: true,
                }],
                ..Default::default()
            },
            specs: Vec::new(),
            status: None,
        }
    }

    /// Rule list with every rule requiring derivation replaced by its
    /// deny-all placeholder and every other rule copied as is.
    pub fn fail_closed(rules: &[ClassifiedRule]) -> Vec<Rule> {
        rules
            .iter()
            .map(|classified| {
                if classified.requires_derivation() {
                    Rule::deny_all_egress(&classified.rule)
                } else {
                    classified.rule.clone()
                }
            })
            .collect()
    }

    /// Synthesize the derivative of `parent`.
    ///
    /// `scope` is the parent's real scope; the parent is re-wrapped under the
    /// matching kind before parsing. On a resolution failure or cancellation
    /// the error carries the deny-closed partial derivative.
    pub async fn synthesize(
        &self,
        cancel: &CancelSignal,
        parent: &PolicyObject,
        scope: PolicyScope,
    ) -> Result<PolicyObject, SynthesisError> {
        let mut derivative = Self::skeleton(parent, scope);
        let reference = derivative.reference();

        let rules = match self.parser.parse(&parent.rewrap(scope)) {
            Ok(rules) => classify(rules),
            Err(err) => {
                warn!(parent = %parent.reference(), error = %err, "Cannot parse parent policy");
                return Err(SynthesisError::new(None, err.into()));
            }
        };

        derivative.specs = Self::fail_closed(&rules);

        for classified in rules.iter().filter(|r| r.requires_derivation()) {
            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(derivative = %reference, index = classified.index, "Synthesis cancelled");
                    return Err(SynthesisError::new(Some(derivative), DerivativeError::Cancelled));
                }
                resolved = self.resolver.resolve(&classified.rule) => resolved,
            };

            match resolved {
                Ok(rule) => derivative.specs[classified.index] = rule,
                Err(source) => {
                    warn!(
                        derivative = %reference,
                        index = classified.index,
                        error = %source,
                        "Cannot resolve rule, derivative stays deny-closed"
                    );
                    let cause = DerivativeError::Resolution {
                        index: classified.index,
                        source,
                    };
                    return Err(SynthesisError::new(Some(derivative), cause));
                }
            }
        }

        info!(
            derivative = %reference,
            rules = derivative.specs.len(),
            "Synthesized derivative policy"
        );
        Ok(derivative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{GroupResolver, StaticGroupProvider};
    use netpol_types::{EgressRule, GroupRef, PolicyKind, Selector, StandardParser};

    fn db_group() -> GroupRef {
        GroupRef::new("static").with_attribute("name", "db")
    }

    fn parent() -> PolicyObject {
        let plain = Rule::for_endpoints(Selector::any().with_label("app", "web"));
        let groups = Rule::for_endpoints(Selector::any().with_label("app", "api")).with_egress(
            EgressRule {
                to_groups: vec![db_group()],
                ..Default::default()
            },
        );
        PolicyObject::namespaced("prod", "egress", vec![plain, groups])
    }

    fn synthesizer(provider: Arc<StaticGroupProvider>) -> DerivativeSynthesizer {
        DerivativeSynthesizer::new(
            Arc::new(StandardParser),
            Arc::new(GroupResolver::new().with_provider(provider)),
        )
    }

    #[test]
    fn test_skeleton_links_parent() {
        let parent = parent();
        let skeleton = DerivativeSynthesizer::skeleton(&parent, PolicyScope::Namespaced);

        assert_eq!(skeleton.name(), format!("egress-togroups-{}", parent.uid()));
        assert_eq!(skeleton.metadata.namespace.as_deref(), Some("prod"));
        assert!(is_derivative(&skeleton));
        assert_eq!(
            skeleton.metadata.labels[PARENT_UID_LABEL],
            parent.uid().to_string()
        );

        let owner = &skeleton.metadata.owner_references[0];
        assert_eq!(owner.uid, parent.uid());
        assert_eq!(owner.kind, PolicyKind::NetworkPolicy);
        assert!(owner.block_owner_deletion);
    }

    #[test]
    fn test_cluster_scoped_owner_kind() {
        let parent = PolicyObject::cluster_scoped("baseline", vec![]);
        let skeleton = DerivativeSynthesizer::skeleton(&parent, PolicyScope::ClusterScoped);
        assert_eq!(skeleton.kind, PolicyKind::ClusterwideNetworkPolicy);
        assert_eq!(
            skeleton.metadata.owner_references[0].kind,
            PolicyKind::ClusterwideNetworkPolicy
        );
        assert!(skeleton.metadata.namespace.is_none());
    }

    #[tokio::test]
    async fn test_synthesize_resolves_in_place() {
        let provider = Arc::new(StaticGroupProvider::new("static"));
        provider.insert(db_group(), vec!["10.1.2.3".parse().unwrap()]);
        let parent = parent();

        let derivative = synthesizer(provider)
            .synthesize(&CancelSignal::never(), &parent, PolicyScope::Namespaced)
            .await
            .unwrap();

        assert_eq!(derivative.specs.len(), 2);
        assert!(derivative.specs[0].egress.is_none());
        let egress = &derivative.specs[1].egress.as_ref().unwrap()[0];
        assert_eq!(egress.to_cidr, vec!["10.1.2.3/32"]);
        assert!(egress.to_groups.is_empty());
    }

    #[tokio::test]
    async fn test_name_is_deterministic() {
        let provider = Arc::new(StaticGroupProvider::new("static"));
        provider.insert(db_group(), vec![]);
        let synthesizer = synthesizer(provider);
        let parent = parent();
        let cancel = CancelSignal::never();

        let first = synthesizer
            .synthesize(&cancel, &parent, PolicyScope::Namespaced)
            .await
            .unwrap();
        let second = synthesizer
            .synthesize(&cancel, &parent, PolicyScope::Namespaced)
            .await
            .unwrap();
        assert_eq!(first.name(), second.name());
    }

    #[tokio::test]
    async fn test_resolution_failure_returns_partial() {
        let parent = parent();
        let err = synthesizer(Arc::new(StaticGroupProvider::new("static")))
            .synthesize(&CancelSignal::never(), &parent, PolicyScope::Namespaced)
            .await
            .unwrap_err();

        assert!(matches!(err.cause, DerivativeError::Resolution { index: 1, .. }));
        let partial = err.partial.unwrap();
        assert!(partial.specs[1].is_deny_all_egress());
        assert_eq!(
            partial.specs[1].endpoint_selector,
            Some(Selector::any().with_label("app", "api").with_label(
                netpol_types::parse::NAMESPACE_LABEL,
                "prod"
            ))
        );
    }

    #[tokio::test]
    async fn test_parse_failure_has_no_partial() {
        let mut parent = PolicyObject::cluster_scoped("baseline", vec![]);
        parent.specs.push(Rule::for_endpoints(Selector::any()));

        // A cluster-scoped parent synthesized as namespaced fails fast.
        let err = synthesizer(Arc::new(StaticGroupProvider::new("static")))
            .synthesize(&CancelSignal::never(), &parent, PolicyScope::Namespaced)
            .await
            .unwrap_err();

        assert!(matches!(err.cause, DerivativeError::Parse(_)));
        assert!(err.partial.is_none());
    }
}
