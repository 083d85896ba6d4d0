//! Exponential backoff scaled by cluster size
//!
//! Every agent of a cluster retries against the same backend, so delays grow
//! with the number of nodes (logarithmically) as well as with the attempt
//! number. Jitter spreads agents that failed at the same moment.

use std::sync::Arc;
use std::time::Duration;

use netpol_backend::CancelSignal;
use rand::Rng;
use tracing::debug;

use crate::config::BackoffConfig;
use crate::error::{StatusError, StatusResult};

/// Source of the current cluster size
pub trait ClusterSizeSource: Send + Sync {
    fn cluster_size(&self) -> usize;
}

/// Cluster size that never changes
#[derive(Debug, Clone, Copy)]
pub struct FixedClusterSize(pub usize);

impl ClusterSizeSource for FixedClusterSize {
    fn cluster_size(&self) -> usize {
        self.0
    }
}

/// Stateful exponential backoff
pub struct ExponentialBackoff {
    config: BackoffConfig,
    cluster_size: Option<Arc<dyn ClusterSizeSource>>,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            cluster_size: None,
            attempt: 0,
        }
    }

    pub fn with_cluster_size(mut self, source: Arc<dyn ClusterSizeSource>) -> Self {
        self.cluster_size = Some(source);
        self
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay for `attempt` without jitter: `min * factor^attempt`, scaled by
    /// `max(1, ln(1 + nodes))` and capped at `max`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max = self.config.max().as_secs_f64();
        let scale = self
            .cluster_size
            .as_ref()
            .map(|source| (source.cluster_size() as f64).ln_1p().max(1.0))
            .unwrap_or(1.0);

        let secs = self.config.min().as_secs_f64()
            * self.config.factor.powi(attempt.min(i32::MAX as u32) as i32)
            * scale;
        Duration::from_secs_f64(secs.min(max))
    }

    /// Next delay, jittered within the upper half of the base delay.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if !self.config.jitter || base.is_zero() {
            return base;
        }
        let half = base / 2;
        half + rand::thread_rng().gen_range(Duration::ZERO..=half)
    }

    /// Sleep for the next delay unless cancelled first.
    pub async fn wait(&mut self, cancel: &CancelSignal) -> StatusResult<()> {
        let delay = self.next_delay();
        debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "Backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StatusError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
