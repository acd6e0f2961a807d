//! Prometheus metrics for observability.
//!
//! The server registry carries:
//! - HTTP request metrics (latency, counts, in flight)
//! - Lifecycle transitions observed through the orchestrator callback
//! - Orchestrator and request store status (collected dynamically)
//! - Every metric exported by `perle_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

use perle_core::RequestState;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "perle_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("perle_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "perle_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Request Lifecycle Metrics
// =============================================================================

/// Requests by current state (collected dynamically).
pub static REQUESTS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("perle_requests_by_state", "Current request count by state"),
        &["state"],
    )
    .unwrap()
});

/// Lifecycle transitions, labelled by the state entered.
pub static REQUEST_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "perle_request_transitions_total",
            "Request lifecycle transitions by target state",
        ),
        &["state"],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "perle_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Requests
    registry
        .register(Box::new(REQUESTS_BY_STATE.clone()))
        .unwrap();
    registry
        .register(Box::new(REQUEST_TRANSITIONS.clone()))
        .unwrap();

    // Orchestrator
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();

    // Core metrics (submissions, steps, infrastructure calls)
    for metric in perle_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the persisted request log.
pub async fn collect_dynamic_metrics(state: &AppState) {
    let status = state.orchestrator().orchestrator_status().await;
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });

    for request_state in RequestState::ALL {
        let label = request_state.as_str();
        let count = status.counts.get(label).copied().unwrap_or(0);
        REQUESTS_BY_STATE.with_label_values(&[label]).set(count);
    }
}

static ENVIRONMENT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/api/v1/environments)/[^/]+").unwrap());
static TRACK_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(/api/v1/tracks)/[^/]+").unwrap());
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace identifiers with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = ENVIRONMENT_PATH.replace(path, "$1/{id}");
    let result = TRACK_PATH.replace(&result, "$1/{track}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
