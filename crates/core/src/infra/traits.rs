//! Capability traits for the external services the orchestrator drives.
//!
//! Every method takes the request identifier, which implementations must use
//! as an idempotency token: repeating a call with the same arguments after a
//! partial failure must not create duplicate external state.

use async_trait::async_trait;

use super::error::InfraError;
use super::types::{ConfigResult, DeployResult, ProvisionResult, ResourceSpec};

/// Creates or verifies infrastructure resources.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Returns the name of this implementation.
    fn name(&self) -> &str;

    /// Provision one resource for the request.
    async fn provision(
        &self,
        request_id: &str,
        spec: &ResourceSpec,
    ) -> Result<ProvisionResult, InfraError>;
}

/// Configures CI/CD pipelines for environments.
#[async_trait]
pub trait PipelineConfigurer: Send + Sync {
    /// Returns the name of this implementation.
    fn name(&self) -> &str;

    /// Configure the pipeline for the request from a CI/CD profile.
    async fn configure(&self, request_id: &str, ci_profile: &str)
        -> Result<ConfigResult, InfraError>;
}

/// Applies agent orchestration policies to environments.
#[async_trait]
pub trait AgentDeployer: Send + Sync {
    /// Returns the name of this implementation.
    fn name(&self) -> &str;

    /// Apply the agent policy to the request's environment.
    async fn deploy(&self, request_id: &str, agent_policy: &str)
        -> Result<DeployResult, InfraError>;
}
