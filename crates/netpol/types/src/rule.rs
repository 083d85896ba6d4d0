//! Network policy rules
//!
//! A [`Rule`] selects a set of subjects (endpoints or nodes) and lists the
//! ingress and egress peers they may talk to. Rules are the unit of
//! derivation: a rule whose egress references a group can only be enforced
//! after the group has been resolved into concrete addresses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label selector matching on exact label values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl Selector {
    /// Selector that matches every subject.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.match_labels.get(key).map(String::as_str)
    }
}

/// Transport protocol of a port rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    #[default]
    Any,
}

/// Destination port restriction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRule {
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

/// Reference to an externally managed group of addresses.
///
/// The provider names the system that owns the group (a cloud security
/// group, an address book); the attributes identify the group within it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupRef {
    pub provider: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl GroupRef {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.provider)?;
        for (key, value) in &self.attributes {
            write!(f, ",{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Allowed ingress peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_endpoints: Vec<Selector>,
    #[serde(default, rename = "fromCIDR", skip_serializing_if = "Vec::is_empty")]
    pub from_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_ports: Vec<PortRule>,
}

/// Allowed egress peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_endpoints: Vec<Selector>,
    #[serde(default, rename = "toCIDR", skip_serializing_if = "Vec::is_empty")]
    pub to_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_groups: Vec<GroupRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_ports: Vec<PortRule>,
}

/// A single policy rule.
///
/// `ingress: None` leaves ingress untouched by this rule, while
/// `ingress: Some(vec![])` puts the subjects into default-deny for ingress.
/// The same holds for `egress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_selector: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Vec<IngressRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<Vec<EgressRule>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Rule {
    /// Rule applying to endpoints matched by `selector`.
    pub fn for_endpoints(selector: Selector) -> Self {
        Self {
            endpoint_selector: Some(selector),
            ..Default::default()
        }
    }

    pub fn with_egress(mut self, egress: EgressRule) -> Self {
        self.egress.get_or_insert_with(Vec::new).push(egress);
        self
    }

    pub fn with_ingress(mut self, ingress: IngressRule) -> Self {
        self.ingress.get_or_insert_with(Vec::new).push(ingress);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether this rule references entities that must be resolved before it
    /// can be enforced.
    pub fn requires_derivation(&self) -> bool {
        self.egress
            .iter()
            .flatten()
            .any(|egress| !egress.to_groups.is_empty())
    }

    /// Fail-closed stand-in for `subject`: same subjects, egress enabled with
    /// no allowed peers.
    pub fn deny_all_egress(subject: &Rule) -> Self {
        Self {
            endpoint_selector: subject.endpoint_selector.clone(),
            node_selector: subject.node_selector.clone(),
            ingress: None,
            egress: Some(Vec::new()),
            labels: subject.labels.clone(),
            description: String::new(),
        }
    }

    pub fn is_deny_all_egress(&self) -> bool {
        self.ingress.is_none() && matches!(&self.egress, Some(egress) if egress.is_empty())
    }

    /// All group references in this rule's egress section, in order.
    pub fn group_refs(&self) -> impl Iterator<Item = &GroupRef> {
        self.egress
            .iter()
            .flatten()
            .flat_map(|egress| egress.to_groups.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_rule() -> Rule {
        Rule::for_endpoints(Selector::any().with_label("app", "web")).with_egress(EgressRule {
            to_groups: vec![GroupRef::new("aws").with_attribute("securityGroupsIds", "sg-1")],
            ..Default::default()
        })
    }

    #[test]
    fn test_requires_derivation() {
        assert!(group_rule().requires_derivation());

        let plain = Rule::for_endpoints(Selector::any()).with_egress(EgressRule {
            to_cidr: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        });
        assert!(!plain.requires_derivation());
        assert!(!Rule::default().requires_derivation());
    }

    #[test]
    fn test_deny_all_keeps_subject() {
        let rule = group_rule();
        let deny = Rule::deny_all_egress(&rule);

        assert!(deny.is_deny_all_egress());
        assert_eq!(deny.endpoint_selector, rule.endpoint_selector);
        assert!(!deny.requires_derivation());
        assert!(!rule.is_deny_all_egress());
    }

    #[test]
    fn test_rule_wire_names() {
        let json = serde_json::to_value(group_rule()).unwrap();
        assert_eq!(
            json["endpointSelector"]["matchLabels"]["app"],
            serde_json::json!("web")
        );
        assert_eq!(json["egress"][0]["toGroups"][0]["provider"], "aws");
        assert!(json.get("ingress").is_none());
    }
}
