//! Scope-aware rule parsing
//!
//! Parsing validates a policy's rules and normalizes them for enforcement.
//! The object's kind selects the parsing path: namespaced policies pin their
//! subjects to the policy namespace, cluster-scoped policies do not. An
//! object carried under the wrong kind is rejected instead of being parsed
//! with the wrong semantics.

use std::net::IpAddr;

use tracing::trace;

use crate::error::{ParseError, ParseResult};
use crate::object::{PolicyObject, PolicyScope};
use crate::rule::{Rule, Selector};

/// Endpoint label carrying the endpoint's namespace
pub const NAMESPACE_LABEL: &str = "k8s:io.kubernetes.pod.namespace";

/// Provenance labels stamped onto every parsed rule
pub const POLICY_NAME_LABEL: &str = "io.netpol.policy.name";
pub const POLICY_NAMESPACE_LABEL: &str = "io.netpol.policy.namespace";
pub const POLICY_UID_LABEL: &str = "io.netpol.policy.uid";
pub const POLICY_DERIVED_FROM_LABEL: &str = "io.netpol.policy.derived-from";

/// Turns a policy object into its parsed rule sequence
pub trait PolicyParser: Send + Sync {
    /// Parse the rules of `policy`, using the path that matches its kind.
    fn parse(&self, policy: &PolicyObject) -> ParseResult<Vec<Rule>>;
}

/// Parser implementing the standard validation and normalization
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardParser;

impl PolicyParser for StandardParser {
    fn parse(&self, policy: &PolicyObject) -> ParseResult<Vec<Rule>> {
        let reference = policy.reference().to_string();

        if policy.specs.is_empty() {
            return Err(ParseError::Empty { policy: reference });
        }

        let namespace = match (policy.kind.scope(), policy.metadata.namespace.as_deref()) {
            (PolicyScope::Namespaced, Some(ns)) if !ns.is_empty() => Some(ns),
            (PolicyScope::Namespaced, _) => {
                return Err(ParseError::MissingNamespace { policy: reference })
            }
            (PolicyScope::ClusterScoped, None) | (PolicyScope::ClusterScoped, Some("")) => None,
            (PolicyScope::ClusterScoped, Some(ns)) => {
                return Err(ParseError::UnexpectedNamespace {
                    policy: reference,
                    namespace: ns.to_string(),
                })
            }
        };

        let rules = policy
            .specs
            .iter()
            .enumerate()
            .map(|(index, rule)| sanitize_rule(policy, namespace, index, rule))
            .collect::<ParseResult<Vec<_>>>()?;

        trace!(policy = %reference, rules = rules.len(), "Parsed policy");
        Ok(rules)
    }
}

fn sanitize_rule(
    policy: &PolicyObject,
    namespace: Option<&str>,
    index: usize,
    rule: &Rule,
) -> ParseResult<Rule> {
    let invalid = |reason: &str| ParseError::InvalidRule {
        policy: policy.reference().to_string(),
        index,
        reason: reason.to_string(),
    };

    match (&rule.endpoint_selector, &rule.node_selector) {
        (Some(_), Some(_)) => return Err(invalid("rule selects both endpoints and nodes")),
        (None, None) => return Err(invalid("rule has no endpoint or node selector")),
        (None, Some(_)) if namespace.is_some() => {
            return Err(invalid(
                "node selectors are only valid in cluster-scoped policies",
            ))
        }
        _ => {}
    }

    let mut rule = rule.clone();

    for ingress in rule.ingress.iter().flatten() {
        validate_cidrs(&ingress.from_cidr).map_err(|reason| invalid(&reason))?;
        validate_ports(ingress.to_ports.iter().map(|p| p.port)).map_err(|r| invalid(&r))?;
    }
    for egress in rule.egress.iter().flatten() {
        validate_cidrs(&egress.to_cidr).map_err(|reason| invalid(&reason))?;
        validate_ports(egress.to_ports.iter().map(|p| p.port)).map_err(|r| invalid(&r))?;
        if egress.to_groups.iter().any(|group| group.provider.is_empty()) {
            return Err(invalid("group reference without provider"));
        }
    }

    if let Some(namespace) = namespace {
        // The subject is always confined to the policy namespace; peers
        // only default to it when they do not name a namespace themselves.
        if let Some(selector) = rule.endpoint_selector.as_mut() {
            selector
                .match_labels
                .insert(NAMESPACE_LABEL.to_string(), namespace.to_string());
        }
        for ingress in rule.ingress.iter_mut().flatten() {
            ingress
                .from_endpoints
                .iter_mut()
                .for_each(|peer| default_namespace(peer, namespace));
        }
        for egress in rule.egress.iter_mut().flatten() {
            egress
                .to_endpoints
                .iter_mut()
                .for_each(|peer| default_namespace(peer, namespace));
        }
    }

    rule.labels
        .insert(POLICY_NAME_LABEL.to_string(), policy.name().to_string());
    rule.labels
        .insert(POLICY_UID_LABEL.to_string(), policy.uid().to_string());
    rule.labels.insert(
        POLICY_DERIVED_FROM_LABEL.to_string(),
        policy.kind.as_str().to_string(),
    );
    match namespace {
        Some(namespace) => {
            rule.labels
                .insert(POLICY_NAMESPACE_LABEL.to_string(), namespace.to_string());
        }
        None => {
            rule.labels.remove(POLICY_NAMESPACE_LABEL);
        }
    }

    Ok(rule)
}

fn default_namespace(selector: &mut Selector, namespace: &str) {
    selector
        .match_labels
        .entry(NAMESPACE_LABEL.to_string())
        .or_insert_with(|| namespace.to_string());
}

fn validate_ports(ports: impl Iterator<Item = u16>) -> Result<(), String> {
    for port in ports {
        if port == 0 {
            return Err("port 0 is not a valid destination port".to_string());
        }
    }
    Ok(())
}

fn validate_cidrs(cidrs: &[String]) -> Result<(), String> {
    for cidr in cidrs {
        if !is_valid_cidr(cidr) {
            return Err(format!("invalid CIDR {:?}", cidr));
        }
    }
    Ok(())
}

/// Accepts `addr/prefix` as well as a bare address.
pub fn is_valid_cidr(cidr: &str) -> bool {
    let (addr, prefix) = match cidr.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (cidr, None),
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    match prefix {
        None => true,
        Some(prefix) => prefix
            .parse::<u8>()
            .map(|prefix| prefix <= max_prefix)
            .unwrap_or(false),
    }
}
