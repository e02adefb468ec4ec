//! Prometheus metrics for the routing engine.
//!
//! Provides counters and histograms for per-attempt outcomes and latency,
//! and per-request routing outcomes. All recording functions are no-ops
//! unless the `prometheus` feature is enabled, so the router can call them
//! unconditionally.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::providers::Tier;

/// Install the Prometheus recorder and return a handle for rendering the
/// scrape endpoint. Call once at startup.
#[cfg(feature = "prometheus")]
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Record one provider attempt (success, error, or cancelled).
pub fn record_attempt(provider: &str, model: &str, tier: Tier, outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "routing_attempts_total",
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "tier" => tier.to_string(),
            "outcome" => outcome.to_string(),
        )
        .increment(1);

        histogram!(
            "routing_attempt_duration_seconds",
            "provider" => provider.to_string(),
            "outcome" => outcome.to_string(),
        )
        .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (provider, model, tier, outcome, duration_secs);
    }
}

/// Record the final outcome of one routing decision.
pub fn record_route_outcome(model: &str, outcome: &str, attempts: usize) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "routing_requests_total",
            "model" => model.to_string(),
            "outcome" => outcome.to_string(),
        )
        .increment(1);

        histogram!(
            "routing_attempts_per_request",
            "outcome" => outcome.to_string(),
        )
        .record(attempts as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (model, outcome, attempts);
    }
}
