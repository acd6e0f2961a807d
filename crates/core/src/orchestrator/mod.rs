//! Provisioning orchestrator.
//!
//! Owns the lifecycle of every environment request: identifier handling,
//! step sequencing against the infrastructure leaves, retry with backoff,
//! cancellation, crash recovery, and persistence of every transition.

mod config;
mod runner;
mod types;

pub use config::{ExecutionMode, OrchestratorConfig, RetryConfig};
pub use runner::{ProvisioningOrchestrator, RequestUpdateCallback};
pub use types::{ActiveRequest, CancelOutcome, OrchestratorError, OrchestratorStatus};
