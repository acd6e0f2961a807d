//! Testing utilities and mock implementations.
//!
//! Mock versions of the three infrastructure leaves and a request store
//! wrapper that injects persistence failures, so orchestration can be tested
//! without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use perle_core::infra::InfraError;
//! use perle_core::testing::MockInfra;
//!
//! let mocks = MockInfra::new();
//! mocks.pipeline.fail_next(1, InfraError::permanent("invalid profile")).await;
//!
//! let orchestrator = ProvisioningOrchestrator::new(config, catalog, store, mocks.services());
//! ```

mod failing_store;
mod mock_agents;
mod mock_pipeline;
mod mock_provisioner;

pub use failing_store::FailingRequestStore;
pub use mock_agents::{MockAgentDeployer, RecordedDeploy};
pub use mock_pipeline::{MockPipelineConfigurer, RecordedConfigure};
pub use mock_provisioner::{MockResourceProvisioner, RecordedProvision};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::infra::{InfraError, InfraServices};

/// Scripted behaviour shared by the leaf mocks.
#[derive(Debug, Default)]
pub(crate) struct Script {
    errors: RwLock<VecDeque<InfraError>>,
    delay_ms: RwLock<u64>,
}

impl Script {
    pub(crate) async fn push_errors(&self, count: usize, error: InfraError) {
        let mut errors = self.errors.write().await;
        errors.extend(std::iter::repeat(error).take(count));
    }

    pub(crate) async fn clear(&self) {
        self.errors.write().await.clear();
    }

    pub(crate) async fn set_delay(&self, delay: Duration) {
        *self.delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Wait the configured delay, then hand out the next scripted error.
    pub(crate) async fn next(&self) -> Option<InfraError> {
        let delay_ms = *self.delay_ms.read().await;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        self.errors.write().await.pop_front()
    }
}

/// One mock per leaf, bundled for wiring into an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MockInfra {
    pub provisioner: Arc<MockResourceProvisioner>,
    pub pipeline: Arc<MockPipelineConfigurer>,
    pub agents: Arc<MockAgentDeployer>,
}

impl MockInfra {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf services backed by these mocks.
    pub fn services(&self) -> InfraServices {
        InfraServices {
            provisioner: self.provisioner.clone(),
            pipeline: self.pipeline.clone(),
            agents: self.agents.clone(),
        }
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::catalog::Template;

    /// A template with the given resource kinds and placeholder references.
    pub fn template(resources: &[&str]) -> Template {
        Template {
            description: "Test environment".to_string(),
            infrastructure_template: "test_template.json".to_string(),
            ci_cd_profile: "test_ci_cd_profile.json".to_string(),
            agent_policy: "test_agent_policy.json".to_string(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
        }
    }
}
