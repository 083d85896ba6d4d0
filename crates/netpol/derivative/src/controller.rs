//! Derivative reconciliation
//!
//! Runs synthesis and the lifecycle upsert for one parent, then records the
//! outcome under the derivative's name in the parent's status.

use std::collections::BTreeMap;
use std::sync::Arc;

use netpol_backend::{CancelSignal, ConflictGuard, PolicyBackend, PolicyCache};
use netpol_types::{NodeStatus, PolicyObject, PolicyScope};
use tracing::{info, warn};

use crate::error::{DerivativeError, DerivativeResult};
use crate::lifecycle::DerivativeLifecycle;
use crate::synthesizer::{derivative_name, DerivativeSynthesizer};

/// Keeps the derivative of a parent policy in sync with the parent
pub struct DerivativeController {
    synthesizer: DerivativeSynthesizer,
    lifecycle: DerivativeLifecycle,
    backend: Arc<dyn PolicyBackend>,
    guard: ConflictGuard,
    cache: Option<Arc<dyn PolicyCache>>,
}

impl DerivativeController {
    pub fn new(synthesizer: DerivativeSynthesizer, backend: Arc<dyn PolicyBackend>) -> Self {
        Self {
            synthesizer,
            lifecycle: DerivativeLifecycle::new(backend.clone()),
            backend,
            guard: ConflictGuard::new(),
            cache: None,
        }
    }

    /// Mirror parent writes into `cache` and purge it on identity mismatch.
    pub fn with_cache(mut self, cache: Arc<dyn PolicyCache>) -> Self {
        self.guard = ConflictGuard::with_cache(cache.clone());
        self.cache = Some(cache);
        self
    }

    /// Synthesize and store the derivative of `parent`.
    ///
    /// A resolution failure still stores the deny-closed partial derivative
    /// and then returns the failure. A parse failure stores nothing. Unless
    /// cancelled, the outcome is recorded on the parent either way; when the
    /// derivative cannot be stored, the recorded error is the store failure.
    pub async fn reconcile(
        &self,
        cancel: &CancelSignal,
        parent: &PolicyObject,
        scope: PolicyScope,
    ) -> DerivativeResult<PolicyObject> {
        let name = derivative_name(parent.name(), parent.uid());

        let outcome = match self.synthesizer.synthesize(cancel, parent, scope).await {
            Ok(derivative) => self.lifecycle.upsert(derivative).await,
            Err(err) => {
                if matches!(err.cause, DerivativeError::Cancelled) {
                    return Err(DerivativeError::Cancelled);
                }
                match err.partial {
                    Some(partial) => match self.lifecycle.upsert(*partial).await {
                        Ok(_) => Err(err.cause),
                        Err(upsert_err) => {
                            warn!(
                                parent = %parent.reference(),
                                derivative = %name,
                                error = %upsert_err,
                                "Cannot store partial derivative"
                            );
                            Err(upsert_err)
                        }
                    },
                    None => Err(err.cause),
                }
            }
        };

        if let Err(record_err) = self.record_status(parent, &name, outcome.as_ref().err()).await {
            warn!(
                parent = %parent.reference(),
                derivative = %name,
                error = %record_err,
                "Cannot record derivative status on parent"
            );
            if outcome.is_ok() {
                return Err(record_err);
            }
        }

        if outcome.is_ok() {
            info!(parent = %parent.reference(), derivative = %name, "Derivative policy in sync");
        }
        outcome
    }

    async fn record_status(
        &self,
        parent: &PolicyObject,
        name: &str,
        error: Option<&DerivativeError>,
    ) -> DerivativeResult<()> {
        let mut live = self.backend.fetch(&parent.reference()).await?;
        self.guard.verify(&live, parent.uid())?;

        let status = NodeStatus::from_outcome(
            false,
            error.is_none(),
            error.map(ToString::to_string),
            0,
            BTreeMap::new(),
        );
        live.status_or_default().set_derivative_status(name, status);

        let written = if self.backend.capabilities().status_subresource {
            self.backend.update_status(live).await?
        } else {
            self.backend.update(live).await?
        };

        if let Some(cache) = &self.cache {
            cache.upsert(written);
        }
        Ok(())
    }
}
