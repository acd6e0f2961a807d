use std::sync::Arc;

use perle_core::{Config, ProvisioningOrchestrator, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<ProvisioningOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<ProvisioningOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &ProvisioningOrchestrator {
        self.orchestrator.as_ref()
    }
}
