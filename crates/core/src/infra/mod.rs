//! Infrastructure leaf components.
//!
//! The orchestrator only sees three capability traits:
//!
//! - [`ResourceProvisioner`] creates or verifies one resource
//! - [`PipelineConfigurer`] configures the CI/CD pipeline
//! - [`AgentDeployer`] applies the agent orchestration policy
//!
//! All three are idempotent on the request identifier and report failures as
//! [`InfraError::Transient`] or [`InfraError::Permanent`].

mod config;
mod error;
mod http;
mod simulated;
mod traits;
mod types;

use std::sync::Arc;

pub use config::{HttpInfraConfig, InfraBackend, InfraConfig, SimulatedConfig};
pub use error::InfraError;
pub use http::HttpInfraClient;
pub use simulated::{SimulatedInfrastructure, SimulatedObject};
pub use traits::{AgentDeployer, PipelineConfigurer, ResourceProvisioner};
pub use types::{ConfigResult, DeployResult, ProvisionResult, ResourceSpec};

/// The three leaf components wired to one backend.
#[derive(Clone)]
pub struct InfraServices {
    pub provisioner: Arc<dyn ResourceProvisioner>,
    pub pipeline: Arc<dyn PipelineConfigurer>,
    pub agents: Arc<dyn AgentDeployer>,
}

/// Build the leaf components for the configured backend.
pub fn create_infra_services(config: &InfraConfig) -> Result<InfraServices, InfraError> {
    match config.backend {
        InfraBackend::Simulated => {
            let infra = Arc::new(SimulatedInfrastructure::new(config.simulated.clone()));
            Ok(InfraServices {
                provisioner: infra.clone(),
                pipeline: infra.clone(),
                agents: infra,
            })
        }
        InfraBackend::Http => {
            let http_config = config.http.clone().ok_or_else(|| {
                InfraError::permanent("http backend selected but no [infrastructure.http] section")
            })?;
            let client = Arc::new(HttpInfraClient::new(http_config)?);
            Ok(InfraServices {
                provisioner: client.clone(),
                pipeline: client.clone(),
                agents: client,
            })
        }
    }
}
