//! Rule resolution
//!
//! A [`RuleResolver`] turns a rule requiring derivation into a concrete rule.
//! [`GroupResolver`] does so by asking a [`GroupProvider`] for the current
//! members of every referenced group and allowing egress to those addresses.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use netpol_types::{GroupRef, Rule};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ResolutionError;

/// Resolves a rule into a concrete rule. May be slow.
#[async_trait]
pub trait RuleResolver: Send + Sync {
    async fn resolve(&self, rule: &Rule) -> Result<Rule, ResolutionError>;
}

/// Source of group membership
#[async_trait]
pub trait GroupProvider: Send + Sync {
    /// Provider name, matched against [`GroupRef::provider`].
    fn name(&self) -> &str;

    /// Current member addresses of `group`.
    async fn addresses(&self, group: &GroupRef) -> Result<Vec<IpAddr>, ResolutionError>;
}

/// Resolver replacing group peers by their member addresses
#[derive(Default)]
pub struct GroupResolver {
    providers: HashMap<String, Arc<dyn GroupProvider>>,
}

impl GroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn GroupProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }
}

#[async_trait]
impl RuleResolver for GroupResolver {
    async fn resolve(&self, rule: &Rule) -> Result<Rule, ResolutionError> {
        let mut resolved = rule.clone();

        for egress in resolved.egress.iter_mut().flatten() {
            for group in std::mem::take(&mut egress.to_groups) {
                let provider = self
                    .providers
                    .get(&group.provider)
                    .ok_or_else(|| ResolutionError::UnknownProvider(group.provider.clone()))?;

                let addresses = provider.addresses(&group).await?;
                debug!(group = %group, addresses = addresses.len(), "Resolved group");

                for address in addresses {
                    let cidr = host_cidr(address);
                    if !egress.to_cidr.contains(&cidr) {
                        egress.to_cidr.push(cidr);
                    }
                }
            }
        }

        Ok(resolved)
    }
}

fn host_cidr(address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => format!("{}/32", v4),
        IpAddr::V6(v6) => format!("{}/128", v6),
    }
}

/// One group of a [`StaticGroupProvider`], as read from a groups file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticGroup {
    pub group: GroupRef,
    pub addresses: Vec<IpAddr>,
}

/// Map-backed group provider
pub struct StaticGroupProvider {
    name: String,
    groups: RwLock<BTreeMap<GroupRef, Vec<IpAddr>>>,
}

impl StaticGroupProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: RwLock::new(BTreeMap::new()),
        }
    }

    /// Provider serving the groups of `entries` that belong to `name`.
    pub fn from_entries(name: impl Into<String>, entries: Vec<StaticGroup>) -> Self {
        let provider = Self::new(name);
        for entry in entries {
            if entry.group.provider == provider.name {
                provider.insert(entry.group, entry.addresses);
            }
        }
        provider
    }

    pub fn insert(&self, group: GroupRef, addresses: Vec<IpAddr>) {
        self.groups.write().insert(group, addresses);
    }

    pub fn remove(&self, group: &GroupRef) {
        self.groups.write().remove(group);
    }
}

#[async_trait]
impl GroupProvider for StaticGroupProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn addresses(&self, group: &GroupRef) -> Result<Vec<IpAddr>, ResolutionError> {
        self.groups
            .read()
            .get(group)
            .cloned()
            .ok_or_else(|| ResolutionError::Group {
                group: group.to_string(),
                reason: "unknown group".to_string(),
            })
    }
}
