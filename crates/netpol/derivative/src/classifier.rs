//! Rule classification
//!
//! Flags which rules of a parsed rule set reference externally resolved
//! entities and therefore require a derivative policy.

use netpol_types::{ParseResult, PolicyObject, PolicyParser, Rule};
use serde::{Deserialize, Serialize};

/// Derivation requirement of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleClass {
    /// Already concrete.
    Plain,
    /// References an entity that must be resolved first.
    RequiresDerivation,
}

impl RuleClass {
    pub fn of(rule: &Rule) -> Self {
        if rule.requires_derivation() {
            RuleClass::RequiresDerivation
        } else {
            RuleClass::Plain
        }
    }
}

/// A rule with its position and class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRule {
    pub index: usize,
    pub class: RuleClass,
    pub rule: Rule,
}

impl ClassifiedRule {
    pub fn requires_derivation(&self) -> bool {
        self.class == RuleClass::RequiresDerivation
    }
}

/// Annotate each rule with its class, preserving order.
pub fn classify(rules: Vec<Rule>) -> Vec<ClassifiedRule> {
    rules
        .into_iter()
        .enumerate()
        .map(|(index, rule)| ClassifiedRule {
            index,
            class: RuleClass::of(&rule),
            rule,
        })
        .collect()
}

/// Parse `policy` and classify the result.
pub fn classify_policy(
    parser: &dyn PolicyParser,
    policy: &PolicyObject,
) -> ParseResult<Vec<ClassifiedRule>> {
    parser.parse(policy).map(classify)
}

/// Whether any rule of the set requires derivation.
pub fn needs_derivation(rules: &[ClassifiedRule]) -> bool {
    rules.iter().any(ClassifiedRule::requires_derivation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_types::{EgressRule, GroupRef, Selector, StandardParser};

    fn group_rule() -> Rule {
        Rule::for_endpoints(Selector::any()).with_egress(EgressRule {
            to_groups: vec![GroupRef::new("static").with_attribute("name", "db")],
            ..Default::default()
        })
    }

    #[test]
    fn test_classify_preserves_order() {
        let rules = vec![Rule::for_endpoints(Selector::any()), group_rule()];
        let classified = classify(rules);

        assert_eq!(classified[0].index, 0);
        assert_eq!(classified[0].class, RuleClass::Plain);
        assert_eq!(classified[1].class, RuleClass::RequiresDerivation);
        assert!(needs_derivation(&classified));
    }

    #[test]
    fn test_classify_policy_propagates_parse_error() {
        let policy = PolicyObject::namespaced("prod", "empty", vec![]);
        assert!(classify_policy(&StandardParser, &policy).is_err());

        let policy = PolicyObject::namespaced("prod", "groups", vec![group_rule()]);
        let classified = classify_policy(&StandardParser, &policy).unwrap();
        assert!(classified[0].requires_derivation());
    }
}
