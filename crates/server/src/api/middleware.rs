//! HTTP metrics middleware.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::warn;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Record latency, count and in-flight gauge for every request.
///
/// Labels use the normalized path so environment identifiers do not blow up
/// label cardinality. Server errors are also logged.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().as_str().to_owned();
    let route = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();
    let response = next.run(request).await;
    HTTP_REQUESTS_IN_FLIGHT.dec();

    let elapsed = started.elapsed();
    let status = response.status();
    let status_label = status.as_str();

    if status.is_server_error() {
        warn!("{} {} answered {} after {:?}", method, route, status, elapsed);
    }

    let labels = [method.as_str(), route.as_str(), status_label];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(elapsed.as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}
