//! Core provisioning request data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{EnvironmentTrack, Template};

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state of a provisioning request.
///
/// States only move forward: `Pending < ProvisioningResources <
/// ConfiguringPipeline < DeployingAgents < {terminal}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    /// Created, no step started yet.
    Pending,
    /// Creating infrastructure resources.
    ProvisioningResources,
    /// Configuring the CI/CD pipeline.
    ConfiguringPipeline,
    /// Applying the agent policy.
    DeployingAgents,
    /// Every step succeeded.
    Completed,
    /// Failed before any step succeeded.
    Failed,
    /// Failed after at least one step succeeded. Provisioned resources remain.
    FailedPartial,
    /// Cancelled by an operator before or between steps.
    Cancelled,
}

impl RequestState {
    /// Every state, in lifecycle order.
    pub const ALL: [RequestState; 8] = [
        RequestState::Pending,
        RequestState::ProvisioningResources,
        RequestState::ConfiguringPipeline,
        RequestState::DeployingAgents,
        RequestState::Completed,
        RequestState::Failed,
        RequestState::FailedPartial,
        RequestState::Cancelled,
    ];

    /// Position in the lifecycle. All terminal states share the highest rank.
    pub fn rank(&self) -> u8 {
        match self {
            RequestState::Pending => 0,
            RequestState::ProvisioningResources => 1,
            RequestState::ConfiguringPipeline => 2,
            RequestState::DeployingAgents => 3,
            RequestState::Completed
            | RequestState::Failed
            | RequestState::FailedPartial
            | RequestState::Cancelled => 4,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        match next {
            RequestState::Completed => *self == RequestState::DeployingAgents,
            RequestState::Failed => self.rank() <= 1,
            RequestState::FailedPartial => self.rank() >= 2,
            _ => true,
        }
    }

    /// Returns the state as a snake_case string (used for filtering).
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::ProvisioningResources => "provisioning_resources",
            RequestState::ConfiguringPipeline => "configuring_pipeline",
            RequestState::DeployingAgents => "deploying_agents",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::FailedPartial => "failed_partial",
            RequestState::Cancelled => "cancelled",
        }
    }

    /// Parse a state from its snake_case or SCREAMING_SNAKE_CASE name.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|state| state.as_str() == lower)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Steps
// ============================================================================

/// The three orchestration steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ProvisionResources,
    ConfigurePipeline,
    DeployAgents,
}

impl StepKind {
    /// Every step, in execution order.
    pub const ALL: [StepKind; 3] = [
        StepKind::ProvisionResources,
        StepKind::ConfigurePipeline,
        StepKind::DeployAgents,
    ];

    /// The lifecycle state the request is in while this step runs.
    pub fn state(&self) -> RequestState {
        match self {
            StepKind::ProvisionResources => RequestState::ProvisioningResources,
            StepKind::ConfigurePipeline => RequestState::ConfiguringPipeline,
            StepKind::DeployAgents => RequestState::DeployingAgents,
        }
    }

    /// Returns the step as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ProvisionResources => "provision_resources",
            StepKind::ConfigurePipeline => "configure_pipeline",
            StepKind::DeployAgents => "deploy_agents",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure { reason: String },
}

/// Append-only record of one orchestration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which step this records.
    pub kind: StepKind,
    /// Number of attempts made (1 when no retry was needed).
    pub attempts: u32,
    /// Final outcome after all attempts.
    pub outcome: StepOutcome,
    /// External identifiers produced by the step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the last attempt finished.
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// Record a successful step.
    pub fn success(
        kind: StepKind,
        attempts: u32,
        artifacts: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            attempts,
            outcome: StepOutcome::Success,
            artifacts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Record a failed step.
    pub fn failure(
        kind: StepKind,
        attempts: u32,
        reason: impl Into<String>,
        artifacts: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            attempts,
            outcome: StepOutcome::Failure {
                reason: reason.into(),
            },
            artifacts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success)
    }

    /// Failure reason, if the step failed.
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Success => None,
            StepOutcome::Failure { reason } => Some(reason),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// A request to provision one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    /// Unique environment identifier.
    pub id: String,
    /// Track the environment was requested for.
    pub track: EnvironmentTrack,
    /// Template copied from the catalog at creation.
    pub template: Template,
    /// Current lifecycle state.
    pub state: RequestState,
    /// Step records, in execution order.
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    /// Human readable reason for a failed or cancelled request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the request reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProvisioningRequest {
    /// Build a fresh request in `Pending`.
    pub fn new(id: impl Into<String>, track: EnvironmentTrack, template: Template) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            track,
            template,
            state: RequestState::Pending,
            steps: Vec::new(),
            reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the given step already has a successful record.
    pub fn step_succeeded(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|s| s.kind == kind && s.is_success())
    }

    /// Whether any step has succeeded.
    pub fn any_step_succeeded(&self) -> bool {
        self.steps.iter().any(StepRecord::is_success)
    }

    /// Apply a state transition in memory, enforcing monotonicity.
    ///
    /// Stores call this before persisting so the rules live in one place.
    pub fn apply_transition(
        &mut self,
        next: RequestState,
        reason: Option<String>,
    ) -> Result<(), (RequestState, RequestState)> {
        if !self.state.can_transition_to(next) {
            return Err((self.state, next));
        }
        let now = Utc::now();
        self.state = next;
        if reason.is_some() {
            self.reason = reason;
        }
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ConfigCatalog;

    fn demo_request() -> ProvisioningRequest {
        let template = ConfigCatalog::builtin().resolve("demo").unwrap();
        ProvisioningRequest::new("demo-1", EnvironmentTrack::Demo, template)
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RequestState::Pending,
            RequestState::ProvisioningResources,
            RequestState::ConfiguringPipeline,
            RequestState::DeployingAgents,
            RequestState::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_backward_or_terminal_transitions() {
        assert!(!RequestState::ConfiguringPipeline.can_transition_to(RequestState::Pending));
        assert!(!RequestState::DeployingAgents.can_transition_to(RequestState::DeployingAgents));
        for terminal in [
            RequestState::Completed,
            RequestState::Failed,
            RequestState::FailedPartial,
            RequestState::Cancelled,
        ] {
            for next in RequestState::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_failure_exit_depends_on_progress() {
        assert!(RequestState::ProvisioningResources.can_transition_to(RequestState::Failed));
        assert!(!RequestState::ProvisioningResources.can_transition_to(RequestState::FailedPartial));
        assert!(RequestState::ConfiguringPipeline.can_transition_to(RequestState::FailedPartial));
        assert!(!RequestState::DeployingAgents.can_transition_to(RequestState::Failed));
        assert!(!RequestState::ConfiguringPipeline.can_transition_to(RequestState::Completed));
    }

    #[test]
    fn test_cancel_allowed_from_any_active_state() {
        for state in [
            RequestState::Pending,
            RequestState::ProvisioningResources,
            RequestState::ConfiguringPipeline,
            RequestState::DeployingAgents,
        ] {
            assert!(state.can_transition_to(RequestState::Cancelled));
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&RequestState::FailedPartial).unwrap();
        assert_eq!(json, "\"FAILED_PARTIAL\"");
        assert_eq!(RequestState::parse("failed_partial"), Some(RequestState::FailedPartial));
        assert_eq!(RequestState::parse("PENDING"), Some(RequestState::Pending));
        assert_eq!(RequestState::parse("nope"), None);
    }

    #[test]
    fn test_apply_transition_sets_completion() {
        let mut request = demo_request();
        request.apply_transition(RequestState::ProvisioningResources, None).unwrap();
        assert!(request.completed_at.is_none());

        request
            .apply_transition(RequestState::Failed, Some("quota exceeded".to_string()))
            .unwrap();
        assert!(request.completed_at.is_some());
        assert_eq!(request.reason.as_deref(), Some("quota exceeded"));

        let err = request
            .apply_transition(RequestState::Completed, None)
            .unwrap_err();
        assert_eq!(err, (RequestState::Failed, RequestState::Completed));
    }

    #[test]
    fn test_step_record_serialization() {
        let record = StepRecord::failure(
            StepKind::ConfigurePipeline,
            1,
            "invalid profile",
            vec![],
            Utc::now(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "configure_pipeline");
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["reason"], "invalid profile");

        let parsed: StepRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.failure_reason(), Some("invalid profile"));
    }

    #[test]
    fn test_step_progress_queries() {
        let mut request = demo_request();
        assert!(!request.any_step_succeeded());
        request.steps.push(StepRecord::success(
            StepKind::ProvisionResources,
            1,
            vec!["res-1".to_string()],
            Utc::now(),
        ));
        assert!(request.step_succeeded(StepKind::ProvisionResources));
        assert!(!request.step_succeeded(StepKind::ConfigurePipeline));
        assert!(request.any_step_succeeded());
    }
}
