//! Track catalog API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use perle_core::{EnvironmentTrack, Template};
use serde::Serialize;
use std::sync::Arc;

use super::handlers::{error_response, ErrorResponse};
use crate::state::AppState;

/// A track with its provisioning template
#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub track: EnvironmentTrack,
    pub template: Template,
}

/// List every track in catalog order
pub async fn list_tracks(State(state): State<Arc<AppState>>) -> Json<Vec<TrackResponse>> {
    let tracks = state
        .orchestrator()
        .catalog()
        .tracks()
        .map(|(track, template)| TrackResponse {
            track,
            template: template.clone(),
        })
        .collect();
    Json(tracks)
}

/// Get the template of one track
pub async fn get_track(
    State(state): State<Arc<AppState>>,
    Path(track): Path<String>,
) -> Result<Json<TrackResponse>, (StatusCode, Json<ErrorResponse>)> {
    let parsed: EnvironmentTrack = track
        .parse()
        .map_err(|e| error_response(StatusCode::NOT_FOUND, e))?;

    Ok(Json(TrackResponse {
        track: parsed,
        template: state.orchestrator().catalog().get(parsed).clone(),
    }))
}
