use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{environments, handlers, middleware::metrics_middleware, orchestrator, tracks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Track catalog
        .route("/tracks", get(tracks::list_tracks))
        .route("/tracks/{track}", get(tracks::get_track))
        // Environments
        .route(
            "/environments",
            post(environments::create_environment).get(environments::list_environments),
        )
        .route(
            "/environments/{id}",
            get(environments::get_environment).delete(environments::cancel_environment),
        )
        // Orchestrator
        .route("/orchestrator/status", get(orchestrator::get_status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
