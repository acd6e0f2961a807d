//! Mock agent deployer for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::Script;
use crate::infra::{AgentDeployer, DeployResult, InfraError};

/// A recorded deploy call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedDeploy {
    pub request_id: String,
    pub agent_policy: String,
    pub success: bool,
}

/// Mock implementation of the AgentDeployer trait.
#[derive(Debug, Default)]
pub struct MockAgentDeployer {
    calls: Arc<RwLock<Vec<RecordedDeploy>>>,
    script: Script,
}

impl MockAgentDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls.
    pub async fn recorded_calls(&self) -> Vec<RecordedDeploy> {
        self.calls.read().await.clone()
    }

    /// Get the number of calls made.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Make the next `count` calls fail with `error`.
    pub async fn fail_next(&self, count: usize, error: InfraError) {
        self.script.push_errors(count, error).await;
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: InfraError) {
        self.fail_next(1, error).await;
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        self.script.set_delay(delay).await;
    }
}

#[async_trait]
impl AgentDeployer for MockAgentDeployer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn deploy(&self, request_id: &str, agent_policy: &str) -> Result<DeployResult, InfraError> {
        let error = self.script.next().await;
        let mut calls = self.calls.write().await;
        let created = !calls
            .iter()
            .any(|c| c.success && c.request_id == request_id);
        calls.push(RecordedDeploy {
            request_id: request_id.to_string(),
            agent_policy: agent_policy.to_string(),
            success: error.is_none(),
        });
        if let Some(err) = error {
            return Err(err);
        }

        Ok(DeployResult {
            deployment_id: format!("mock-deploy-{}", request_id),
            policy: agent_policy.to_string(),
            created,
        })
    }
}
