//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (submissions, outcomes, step attempts and retries)
//! - Request store (persistence failures)
//! - Infrastructure backends (call duration and results)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Orchestrator - Request Metrics
// =============================================================================

/// Environment submissions by track.
pub static SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "perle_submissions_total",
            "Total environment provisioning submissions",
        ),
        &["track"],
    )
    .unwrap()
});

/// Requests reaching a terminal state, by track and state.
pub static REQUESTS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "perle_requests_finished_total",
            "Total requests that reached a terminal state",
        ),
        &["track", "state"], // state: "completed", "failed", "failed_partial", "cancelled"
    )
    .unwrap()
});

/// Requests currently being driven.
pub static REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "perle_requests_in_flight",
        "Number of requests currently being driven",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator - Step Metrics
// =============================================================================

/// Step attempts by step kind.
pub static STEP_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("perle_step_attempts_total", "Total step attempts"),
        &["step"],
    )
    .unwrap()
});

/// Step retries after a transient failure.
pub static STEP_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "perle_step_retries_total",
            "Total step retries after transient failures",
        ),
        &["step"],
    )
    .unwrap()
});

/// Step duration including retries and backoff.
pub static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "perle_step_duration_seconds",
            "Duration of orchestration steps including retries",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["step", "outcome"], // outcome: "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Store Metrics
// =============================================================================

/// Failed writes to the request store.
pub static PERSISTENCE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "perle_persistence_failures_total",
        "Total request store writes that failed",
    )
    .unwrap()
});

// =============================================================================
// Infrastructure Metrics
// =============================================================================

/// Infrastructure call duration.
pub static INFRA_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "perle_infra_call_duration_seconds",
            "Duration of infrastructure backend calls",
        )
        .buckets(vec![0.005, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["backend", "operation"],
    )
    .unwrap()
});

/// Infrastructure calls by result.
pub static INFRA_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "perle_infra_calls_total",
            "Total infrastructure backend calls",
        ),
        &["backend", "operation", "result"], // result: "success", "transient", "permanent"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Requests
        Box::new(SUBMISSIONS.clone()),
        Box::new(REQUESTS_FINISHED.clone()),
        Box::new(REQUESTS_IN_FLIGHT.clone()),
        // Steps
        Box::new(STEP_ATTEMPTS.clone()),
        Box::new(STEP_RETRIES.clone()),
        Box::new(STEP_DURATION.clone()),
        // Store
        Box::new(PERSISTENCE_FAILURES.clone()),
        // Infrastructure
        Box::new(INFRA_CALL_DURATION.clone()),
        Box::new(INFRA_CALLS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        SUBMISSIONS.with_label_values(&["demo"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "perle_submissions_total"));
    }
}
