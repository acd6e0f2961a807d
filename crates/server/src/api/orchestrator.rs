//! Orchestrator API handlers.

use axum::{extract::State, Json};
use perle_core::OrchestratorStatus;
use std::sync::Arc;

use crate::state::AppState;

/// Get orchestrator status: worker pool, in-flight requests and counts by state
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().orchestrator_status().await)
}
