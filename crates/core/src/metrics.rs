//! Prometheus metrics for batch submission and capacity reservations.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

// =============================================================================
// Connection
// =============================================================================

/// Requests pushed onto submission queues.
pub static REQUESTS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fetchfleet_requests_submitted_total",
        "Total requests pushed onto submission queues",
    )
    .unwrap()
});

/// Outcomes popped from result queues by result.
pub static OUTCOMES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fetchfleet_outcomes_received_total",
            "Total outcomes popped from result queues",
        ),
        &["result"], // "success", "failure", "dropped"
    )
    .unwrap()
});

/// Completion predicate evaluations.
pub static COMPLETION_CHECKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fetchfleet_completion_checks_total",
        "Total batch completion checks against queue metadata",
    )
    .unwrap()
});

/// Wall time of one `send`, from push to returned results.
pub static BATCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "fetchfleet_batch_duration_seconds",
            "Duration of a batch from submission to completion",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .unwrap()
});

// =============================================================================
// Capacity
// =============================================================================

/// Reservation lifecycle events.
pub static RESERVATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fetchfleet_reservations_total",
            "Capacity reservations by action",
        ),
        &["action"], // "acquired", "released"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Process-wide registry holding every metric of this crate.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    if let Err(e) = register_metrics(&registry) {
        warn!(error = %e, "Failed to register metrics");
    }
    registry
});

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(REQUESTS_SUBMITTED.clone()),
        Box::new(OUTCOMES_RECEIVED.clone()),
        Box::new(COMPLETION_CHECKS.clone()),
        Box::new(BATCH_DURATION.clone()),
        Box::new(RESERVATIONS.clone()),
    ]
}

/// Register every metric with `registry`.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}

/// Render [`REGISTRY`] in the prometheus text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();

        REQUESTS_SUBMITTED.inc();
        OUTCOMES_RECEIVED.with_label_values(&["success"]).inc();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"fetchfleet_requests_submitted_total".to_string()));
        assert!(names.contains(&"fetchfleet_outcomes_received_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        assert!(register_metrics(&registry).is_err());
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        COMPLETION_CHECKS.inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("fetchfleet_completion_checks_total"));
        assert!(output.contains("fetchfleet_batch_duration_seconds"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
