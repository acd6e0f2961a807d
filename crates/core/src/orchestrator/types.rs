//! Types for the provisioning orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::request::{ProvisioningRequest, RequestState, StoreError};

/// Errors returned to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Track is not in the catalog.
    #[error(transparent)]
    UnknownTrack(#[from] CatalogError),

    /// Caller-supplied identifier is malformed.
    #[error("invalid environment identifier '{0}': expected 1-63 characters from [A-Za-z0-9._-], starting with a letter or digit")]
    InvalidIdentifier(String),

    /// Identifier is already taken.
    #[error("environment identifier already used: {0}")]
    DuplicateIdentifier(String),

    /// Request not found.
    #[error("environment not found: {0}")]
    NotFound(String),

    /// Operation is not allowed in the request's current state.
    #[error("environment {request_id} is {state}, operation not allowed")]
    InvalidState {
        request_id: String,
        state: RequestState,
    },

    /// Request store failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The request exists but driving it stopped on a store failure. It
    /// stays in its last persisted state and can be queried, cancelled or
    /// resumed under `request_id`.
    #[error("environment {request_id} stalled: persistence error: {source}")]
    Stalled {
        request_id: String,
        #[source]
        source: StoreError,
    },
}

/// Result of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The request was idle and is now `Cancelled`.
    Cancelled(ProvisioningRequest),
    /// The request is being driven; it stops at the next step boundary.
    Scheduled(ProvisioningRequest),
}

impl CancelOutcome {
    pub fn request(&self) -> &ProvisioningRequest {
        match self {
            CancelOutcome::Cancelled(r) | CancelOutcome::Scheduled(r) => r,
        }
    }
}

/// A request currently being driven.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequest {
    /// Identifier of the request.
    pub request_id: String,
    /// When this drive started.
    pub started_at: DateTime<Utc>,
    /// Reason of a pending cancellation, honoured at the next step boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_requested: Option<String>,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    /// Whether the orchestrator is running.
    pub running: bool,
    /// Worker pool size.
    pub max_concurrent_requests: usize,
    /// Requests currently being driven.
    pub in_flight: Vec<ActiveRequest>,
    /// Persisted requests per lifecycle state.
    pub counts: BTreeMap<String, i64>,
}
