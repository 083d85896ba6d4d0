//! Status reconciliation driver
//!
//! Reports this node's enforcement outcome for a policy revision:
//!
//! ```text
//! start -> wait-for-local-enforcement -> prepare -> publish -> { retry | done }
//! ```
//!
//! Backend failures are retried, except an identity mismatch. Enforcement,
//! parse and identity failures end the call right after one best-effort
//! publish.

use std::sync::Arc;

use async_trait::async_trait;
use netpol_backend::{
    BackendError, CancelSignal, ConflictGuard, PolicyBackend, PolicyCache, SideStore,
};
use netpol_types::{
    NodeName, NodeStatus, NodeStatusSet, PolicyObject, PolicyParser, StandardParser,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::{ClusterSizeSource, ExponentialBackoff};
use crate::config::StatusConfig;
use crate::error::{StatusError, StatusResult};
use crate::metrics::StatusMetrics;
use crate::strategy::{select_publisher, PublishTarget, StatusPublisher};

/// Local data-plane enforcement capability
#[async_trait]
pub trait EnforcementWaiter: Send + Sync {
    /// Resolves once every local endpoint enforces `revision`. Failures are
    /// reported as [`StatusError::EnforcementFailed`].
    async fn wait_for_revision(&self, revision: u64) -> StatusResult<()>;
}

/// Drives status publication for one node
pub struct StatusReconciler {
    config: StatusConfig,
    node: NodeName,
    publisher: Arc<dyn StatusPublisher>,
    parser: Arc<dyn PolicyParser>,
    waiter: Option<Arc<dyn EnforcementWaiter>>,
    cache: Option<Arc<dyn PolicyCache>>,
    cluster_size: Option<Arc<dyn ClusterSizeSource>>,
    metrics: Option<Arc<StatusMetrics>>,
}

impl StatusReconciler {
    pub fn builder(config: StatusConfig) -> StatusReconcilerBuilder {
        StatusReconcilerBuilder::new(config)
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }

    /// Name of the selected publish strategy
    pub fn strategy(&self) -> &'static str {
        self.publisher.name()
    }

    /// Publish this node's status for `policy` at `revision`.
    ///
    /// `import_error` is the error seen importing the policy locally, if
    /// any. It is published as-is and the enforcement wait is skipped.
    pub async fn update_status(
        &self,
        cancel: &CancelSignal,
        policy: &PolicyObject,
        revision: u64,
        import_error: Option<String>,
    ) -> StatusResult<()> {
        let started = Instant::now();
        let reference = policy.reference();

        let mut wait_error = match import_error {
            Some(_) => None,
            None => match self.wait_for_enforcement(cancel, revision).await {
                Ok(()) => None,
                Err(StatusError::Cancelled) => return Err(StatusError::Cancelled),
                Err(err) => {
                    warn!(policy = %reference, revision, error = %err, "Policy not enforced");
                    Some(err)
                }
            },
        };

        let mut backoff = ExponentialBackoff::new(self.config.backoff.clone());
        if let Some(source) = &self.cluster_size {
            backoff = backoff.with_cluster_size(source.clone());
        }

        let mut supply_object = true;
        let mut attempts: u32 = 0;
        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(StatusError::Cancelled);
            }
            attempts += 1;

            let current = self.prepare(policy);
            let annotations = current.metadata.annotations.clone();
            let (enforcing, ok, error, parse_error) = match self.parser.parse(&current) {
                Err(err) => (false, false, Some(err.to_string()), Some(err)),
                Ok(_) => match (&import_error, &wait_error) {
                    (Some(err), _) => (false, false, Some(err.clone()), None),
                    (None, Some(err)) => (false, true, Some(err.to_string()), None),
                    (None, None) => (true, true, None, None),
                },
            };
            let status = NodeStatus::from_outcome(enforcing, ok, error, revision, annotations);

            let target = PublishTarget {
                reference: reference.clone(),
                uid: (!policy.uid().is_unassigned()).then(|| policy.uid()),
                object: supply_object.then_some(current),
            };
            let mut pending = NodeStatusSet::new();
            pending.insert(self.node.clone(), status);

            let result = self.publisher.publish(cancel, &target, &mut pending).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_publish(self.publisher.name(), result.is_ok());
            }

            if let Some(err) = parse_error {
                warn!(policy = %reference, error = %err, "Policy no longer parses");
                break Err(StatusError::Parse(err));
            }
            if let Some(err) = wait_error.take() {
                break Err(err);
            }

            match result {
                Ok(()) => break Ok(()),
                Err(err) if err.is_retryable() => {
                    if matches!(err, StatusError::Backend(BackendError::Conflict { .. })) {
                        supply_object = false;
                    }
                    warn!(
                        policy = %reference,
                        attempt = attempts,
                        error = %err,
                        "Status publish failed, retrying"
                    );
                    if let Err(err) = backoff.wait(cancel).await {
                        break Err(err);
                    }
                }
                Err(err) => break Err(err),
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.observe_completion(attempts, outcome.is_ok(), started.elapsed());
        }
        match &outcome {
            Ok(()) => info!(
                policy = %reference,
                node = %self.node,
                revision,
                attempts,
                "Published policy status"
            ),
            Err(err) => debug!(
                policy = %reference,
                node = %self.node,
                attempts,
                error = %err,
                "Status update ended"
            ),
        }
        outcome
    }

    async fn wait_for_enforcement(
        &self,
        cancel: &CancelSignal,
        revision: u64,
    ) -> StatusResult<()> {
        let Some(waiter) = &self.waiter else {
            return Ok(());
        };
        let timeout = self.config.enforcement_timeout();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StatusError::Cancelled),
            result = tokio::time::timeout(timeout, waiter.wait_for_revision(revision)) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(StatusError::EnforcementTimeout { revision, timeout }),
            },
        }
    }

    /// Most recent cached copy of `policy`, or `policy` itself.
    fn prepare(&self, policy: &PolicyObject) -> PolicyObject {
        self.cache
            .as_ref()
            .and_then(|cache| cache.get(&policy.reference()))
            .unwrap_or_else(|| policy.clone())
    }
}

/// Builder for [`StatusReconciler`]
pub struct StatusReconcilerBuilder {
    config: StatusConfig,
    backend: Option<Arc<dyn PolicyBackend>>,
    side_store: Option<Arc<dyn SideStore>>,
    waiter: Option<Arc<dyn EnforcementWaiter>>,
    parser: Option<Arc<dyn PolicyParser>>,
    cache: Option<Arc<dyn PolicyCache>>,
    cluster_size: Option<Arc<dyn ClusterSizeSource>>,
    metrics: Option<Arc<StatusMetrics>>,
    publisher: Option<Arc<dyn StatusPublisher>>,
}

impl StatusReconcilerBuilder {
    pub fn new(config: StatusConfig) -> Self {
        Self {
            config,
            backend: None,
            side_store: None,
            waiter: None,
            parser: None,
            cache: None,
            cluster_size: None,
            metrics: None,
            publisher: None,
        }
    }

    /// Set the policy backend
    pub fn with_backend(mut self, backend: Arc<dyn PolicyBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the side store used when the side channel is enabled
    pub fn with_side_store(mut self, store: Arc<dyn SideStore>) -> Self {
        self.side_store = Some(store);
        self
    }

    /// Set the enforcement waiter. Without one the wait is skipped.
    pub fn with_waiter(mut self, waiter: Arc<dyn EnforcementWaiter>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    /// Set the policy parser (defaults to [`StandardParser`])
    pub fn with_parser(mut self, parser: Arc<dyn PolicyParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Set the local policy cache
    pub fn with_cache(mut self, cache: Arc<dyn PolicyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cluster_size(mut self, source: Arc<dyn ClusterSizeSource>) -> Self {
        self.cluster_size = Some(source);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<StatusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Use `publisher` instead of selecting one from the capabilities
    pub fn with_publisher(mut self, publisher: Arc<dyn StatusPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn build(self) -> StatusResult<StatusReconciler> {
        self.config.validate()?;

        let publisher = match self.publisher {
            Some(publisher) => publisher,
            None => {
                let guard = match &self.cache {
                    Some(cache) => ConflictGuard::with_cache(cache.clone()),
                    None => ConflictGuard::new(),
                };
                select_publisher(&self.config, self.backend, self.side_store, guard)?
            }
        };

        Ok(StatusReconciler {
            node: NodeName::new(self.config.node_name.clone()),
            config: self.config,
            publisher,
            parser: self.parser.unwrap_or_else(|| Arc::new(StandardParser)),
            waiter: self.waiter,
            cache: self.cache,
            cluster_size: self.cluster_size,
            metrics: self.metrics,
        })
    }
}
