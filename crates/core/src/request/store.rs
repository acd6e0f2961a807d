//! Request storage trait and types.

use std::fmt;

use crate::catalog::{EnvironmentTrack, Template};
use crate::request::{ProvisioningRequest, RequestState, StepRecord};

/// Error type for request store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Request not found.
    NotFound(String),
    /// A request with this identifier already exists (or existed).
    Duplicate(String),
    /// The transition would move the request backwards or out of a terminal state.
    InvalidTransition {
        request_id: String,
        from: RequestState,
        to: RequestState,
    },
    /// The request is terminal and no longer accepts step records.
    Terminal(String),
    /// Database error.
    Database(String),
    /// Filesystem error.
    Io(String),
    /// Stored record could not be encoded or decoded.
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Request not found: {}", id),
            StoreError::Duplicate(id) => write!(f, "Request identifier already used: {}", id),
            StoreError::InvalidTransition {
                request_id,
                from,
                to,
            } => write!(
                f,
                "Cannot move request {} from {} to {}",
                request_id, from, to
            ),
            StoreError::Terminal(id) => write!(f, "Request {} is already terminal", id),
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::Io(msg) => write!(f, "I/O error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Request to persist a new provisioning request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Identifier (already validated or generated).
    pub id: String,
    /// Track the environment is requested for.
    pub track: EnvironmentTrack,
    /// Template snapshot.
    pub template: Template,
}

/// Filter for querying requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Filter by lifecycle state.
    pub state: Option<RequestState>,
    /// Filter by track.
    pub track: Option<EnvironmentTrack>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl RequestFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            state: None,
            track: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by state.
    pub fn with_state(mut self, state: RequestState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filter by track.
    pub fn with_track(mut self, track: EnvironmentTrack) -> Self {
        self.track = Some(track);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a request passes the state and track conditions.
    pub fn matches(&self, request: &ProvisioningRequest) -> bool {
        self.state.map_or(true, |s| request.state == s)
            && self.track.map_or(true, |t| request.track == t)
    }
}

/// Durable log of provisioning requests.
///
/// Every write is atomic: readers see either the previous or the new record,
/// never a partial one. Identifiers are never reused, even after a request
/// fails. Step records can only be appended.
pub trait RequestStore: Send + Sync {
    /// Persist a new request in `Pending`.
    fn create(&self, request: NewRequest) -> Result<ProvisioningRequest, StoreError>;

    /// Get a request by ID.
    fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError>;

    /// Whether an identifier has ever been used.
    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }

    /// List requests matching the filter, newest first.
    fn list(&self, filter: &RequestFilter) -> Result<Vec<ProvisioningRequest>, StoreError>;

    /// Count requests matching the filter (ignores limit/offset).
    fn count(&self, filter: &RequestFilter) -> Result<i64, StoreError>;

    /// Move a request to a later lifecycle state.
    fn update_state(
        &self,
        id: &str,
        new_state: RequestState,
        reason: Option<String>,
    ) -> Result<ProvisioningRequest, StoreError>;

    /// Append a step record.
    fn append_step(&self, id: &str, record: StepRecord) -> Result<ProvisioningRequest, StoreError>;
}
