//! Status reconciliation metrics

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::error::StatusResult;

/// Metrics for status reconciliation
pub struct StatusMetrics {
    /// Duration of a whole status update, by attempt count and outcome
    pub completion_seconds: HistogramVec,

    /// Publish attempts, by strategy and outcome
    pub publish_total: IntCounterVec,
}

impl StatusMetrics {
    /// Create and register status metrics
    pub fn new(registry: &Registry) -> StatusResult<Self> {
        let completion_seconds = HistogramVec::new(
            HistogramOpts::new(
                "policy_status_completion_seconds",
                "Time to publish a node's policy status",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["attempts", "outcome"],
        )?;
        registry.register(Box::new(completion_seconds.clone()))?;

        let publish_total = IntCounterVec::new(
            Opts::new("policy_status_publish_total", "Policy status publish attempts"),
            &["strategy", "outcome"],
        )?;
        registry.register(Box::new(publish_total.clone()))?;

        Ok(Self {
            completion_seconds,
            publish_total,
        })
    }

    pub fn observe_completion(&self, attempts: u32, success: bool, elapsed: Duration) {
        let attempts = attempts.to_string();
        self.completion_seconds
            .with_label_values(&[attempts.as_str(), outcome(success)])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_publish(&self, strategy: &str, success: bool) {
        self.publish_total
            .with_label_values(&[strategy, outcome(success)])
            .inc();
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_record() {
        let registry = Registry::new();
        let metrics = StatusMetrics::new(&registry).unwrap();

        metrics.observe_completion(3, true, Duration::from_millis(250));
        metrics.record_publish("patch", false);

        let count = metrics
            .completion_seconds
            .with_label_values(&["3", "success"])
            .get_sample_count();
        assert_eq!(count, 1);
        assert_eq!(
            metrics
                .publish_total
                .with_label_values(&["patch", "failure"])
                .get(),
            1
        );
    }

    #[test]
    fn test_double_registration_is_an_error() {
        let registry = Registry::new();
        StatusMetrics::new(&registry).unwrap();
        assert!(StatusMetrics::new(&registry).is_err());
    }
}
