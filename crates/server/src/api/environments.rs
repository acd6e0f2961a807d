//! Environment request API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use perle_core::{
    CancelOutcome, EnvironmentTrack, OrchestratorError, ProvisioningRequest, RequestFilter,
    RequestState, StepRecord, Template,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use super::handlers::{error_response, ErrorResponse};
use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting an environment
#[derive(Debug, Deserialize)]
pub struct CreateEnvironmentBody {
    /// Track to provision
    pub track: String,
    /// Explicit identifier; generated when absent
    pub name: Option<String>,
}

/// Query parameters for listing environments
#[derive(Debug, Deserialize)]
pub struct ListEnvironmentsParams {
    pub state: Option<String>,
    pub track: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for cancelling an environment
#[derive(Debug, Deserialize)]
pub struct CancelEnvironmentBody {
    pub reason: Option<String>,
}

/// Snapshot of a provisioning request
#[derive(Debug, Serialize)]
pub struct EnvironmentResponse {
    pub id: String,
    pub track: EnvironmentTrack,
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub template: Template,
    pub steps: Vec<StepRecord>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<ProvisioningRequest> for EnvironmentResponse {
    fn from(request: ProvisioningRequest) -> Self {
        Self {
            id: request.id,
            track: request.track,
            state: request.state,
            reason: request.reason,
            template: request.template,
            steps: request.steps,
            created_at: request.created_at.to_rfc3339(),
            updated_at: request.updated_at.to_rfc3339(),
            completed_at: request.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Response for listing environments
#[derive(Debug, Serialize)]
pub struct ListEnvironmentsResponse {
    pub environments: Vec<EnvironmentResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn orchestrator_error(err: OrchestratorError) -> ApiError {
    let status = match &err {
        OrchestratorError::UnknownTrack(_) | OrchestratorError::InvalidIdentifier(_) => {
            StatusCode::BAD_REQUEST
        }
        OrchestratorError::DuplicateIdentifier(_) | OrchestratorError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Persistence(e) => {
            error!("Request store failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        OrchestratorError::Stalled { request_id, source } => {
            error!("Request {} stalled on store failure: {}", request_id, source);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err)
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new environment request
pub async fn create_environment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateEnvironmentBody>,
) -> Result<(StatusCode, Json<EnvironmentResponse>), ApiError> {
    let request = state
        .orchestrator()
        .new_environment(&body.track, body.name.as_deref())
        .await
        .map_err(orchestrator_error)?;

    // Inline execution hands back a finished request
    let status = if request.state.is_terminal() {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };

    Ok((status, Json(EnvironmentResponse::from(request))))
}

/// Get an environment by ID
pub async fn get_environment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EnvironmentResponse>, ApiError> {
    state
        .orchestrator()
        .status(&id)
        .map(|request| Json(EnvironmentResponse::from(request)))
        .map_err(orchestrator_error)
}

/// List environments with optional filters
pub async fn list_environments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListEnvironmentsParams>,
) -> Result<Json<ListEnvironmentsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = RequestFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref state_filter) = params.state {
        let parsed = RequestState::parse(state_filter).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown state '{}'", state_filter),
            )
        })?;
        filter = filter.with_state(parsed);
    }

    if let Some(ref track) = params.track {
        let parsed: EnvironmentTrack = track
            .parse()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_track(parsed);
    }

    let orchestrator = state.orchestrator();
    let environments = orchestrator.list(&filter).map_err(orchestrator_error)?;

    // Total ignores pagination
    let count_filter = RequestFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = orchestrator.count(&count_filter).map_err(orchestrator_error)?;

    Ok(Json(ListEnvironmentsResponse {
        environments: environments
            .into_iter()
            .map(EnvironmentResponse::from)
            .collect(),
        total,
        limit,
        offset,
    }))
}

/// Cancel an environment (DELETE endpoint)
///
/// Answers 200 when the request was cancelled at once and 202 when it is
/// being driven and will stop at its next step boundary.
pub async fn cancel_environment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelEnvironmentBody>>,
) -> Result<(StatusCode, Json<EnvironmentResponse>), ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);

    let outcome = state
        .orchestrator()
        .cancel(&id, reason)
        .await
        .map_err(orchestrator_error)?;

    let (status, request) = match outcome {
        CancelOutcome::Cancelled(request) => (StatusCode::OK, request),
        CancelOutcome::Scheduled(request) => (StatusCode::ACCEPTED, request),
    };

    Ok((status, Json(EnvironmentResponse::from(request))))
}
