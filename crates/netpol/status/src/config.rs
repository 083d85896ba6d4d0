//! Status reconciliation configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{StatusError, StatusResult};

/// Configuration of the status reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Name of the node this agent reports for
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Maximum wait for local enforcement of a revision, in seconds
    #[serde(default = "default_enforcement_timeout")]
    pub enforcement_timeout_secs: u64,

    /// Retry backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Maximum operations per status patch request
    #[serde(default = "default_max_patch_operations")]
    pub max_patch_operations: usize,

    /// Side-channel publication
    #[serde(default)]
    pub side_channel: SideChannelConfig,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            enforcement_timeout_secs: default_enforcement_timeout(),
            backoff: BackoffConfig::default(),
            max_patch_operations: default_max_patch_operations(),
            side_channel: SideChannelConfig::default(),
        }
    }
}

impl StatusConfig {
    /// Default configuration for `node_name`.
    pub fn for_node(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    pub fn enforcement_timeout(&self) -> Duration {
        Duration::from_secs(self.enforcement_timeout_secs)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> StatusResult<()> {
        if self.node_name.trim().is_empty() {
            return Err(StatusError::InvalidConfig("node_name is empty".to_string()));
        }
        if self.max_patch_operations == 0 {
            return Err(StatusError::InvalidConfig(
                "max_patch_operations must be at least 1".to_string(),
            ));
        }
        self.backoff.validate()?;
        if self.side_channel.enabled && self.side_channel.key_prefix.is_empty() {
            return Err(StatusError::InvalidConfig(
                "side_channel.key_prefix is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff between publish attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_backoff_min")]
    pub min_ms: u64,

    /// Upper bound of any delay, in milliseconds
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Growth factor per attempt
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    /// Randomize each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_ms: default_backoff_min(),
            max_ms: default_backoff_max(),
            factor: default_backoff_factor(),
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn validate(&self) -> StatusResult<()> {
        if self.min_ms == 0 {
            return Err(StatusError::InvalidConfig(
                "backoff.min_ms must be positive".to_string(),
            ));
        }
        if self.min_ms > self.max_ms {
            return Err(StatusError::InvalidConfig(format!(
                "backoff.min_ms ({}) exceeds backoff.max_ms ({})",
                self.min_ms, self.max_ms
            )));
        }
        if self.factor.is_nan() || self.factor < 1.0 {
            return Err(StatusError::InvalidConfig(format!(
                "backoff.factor must be at least 1.0, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// Publication of node statuses through the side store instead of the
/// policy backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideChannelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// First key segment
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Key segment grouping all policy statuses
    #[serde(default = "default_statuses_root")]
    pub statuses_root: String,
}

impl Default for SideChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: default_key_prefix(),
            statuses_root: default_statuses_root(),
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_node_name() -> String {
    "localhost".to_string()
}

fn default_enforcement_timeout() -> u64 {
    30
}

fn default_max_patch_operations() -> usize {
    10
}

fn default_backoff_min() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    120_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_key_prefix() -> String {
    "netpol".to_string()
}

fn default_statuses_root() -> String {
    "policystatuses".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StatusConfig::default();
        assert_eq!(config.enforcement_timeout(), Duration::from_secs(30));
        assert_eq!(config.backoff.min(), Duration::from_secs(1));
        assert_eq!(config.backoff.max(), Duration::from_secs(120));
        assert_eq!(config.max_patch_operations, 10);
        assert!(!config.side_channel.enabled);
        assert_eq!(config.side_channel.key_prefix, "netpol");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: StatusConfig =
            serde_json::from_str(r#"{"node_name": "worker-1", "backoff": {"max_ms": 5000}}"#)
                .unwrap();
        assert_eq!(config.node_name, "worker-1");
        assert_eq!(config.backoff.min_ms, 1_000);
        assert_eq!(config.backoff.max_ms, 5_000);
        assert!(config.backoff.jitter);
    }

    #[test]
    fn test_validate_rejects_inconsistent_settings() {
        let mut config = StatusConfig::for_node("");
        assert!(config.validate().is_err());

        config.node_name = "n1".to_string();
        config.max_patch_operations = 0;
        assert!(config.validate().is_err());

        config.max_patch_operations = 5;
        config.backoff.min_ms = 10_000;
        config.backoff.max_ms = 1_000;
        assert!(config.validate().is_err());

        config.backoff.max_ms = 20_000;
        config.backoff.factor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(StatusError::InvalidConfig(_))
        ));
    }
}
