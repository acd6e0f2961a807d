//! Simulated infrastructure backend.
//!
//! Keeps an in-process ledger of everything "created", keyed by idempotency
//! key, and logs what a real backend would do. Useful for demos and for
//! running the service without cloud credentials.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::config::SimulatedConfig;
use super::error::InfraError;
use super::traits::{AgentDeployer, PipelineConfigurer, ResourceProvisioner};
use super::types::{
    agents_idempotency_key, pipeline_idempotency_key, resource_idempotency_key, ConfigResult,
    DeployResult, ProvisionResult, ResourceSpec,
};

/// An external object recorded in the simulated ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedObject {
    /// Idempotency key the object was created under.
    pub key: String,
    /// Generated external identifier.
    pub external_id: String,
    /// Resource kind, CI/CD profile or agent policy.
    pub detail: String,
}

/// In-process implementation of all three leaf components.
#[derive(Debug, Clone, Default)]
pub struct SimulatedInfrastructure {
    config: SimulatedConfig,
    ledger: Arc<RwLock<HashMap<String, SimulatedObject>>>,
}

impl SimulatedInfrastructure {
    /// Create a new simulated backend.
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            ledger: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// All objects created for a request, sorted by key.
    pub async fn objects_for(&self, request_id: &str) -> Vec<SimulatedObject> {
        let prefix = format!("{}:", request_id);
        let mut objects: Vec<_> = self
            .ledger
            .read()
            .await
            .values()
            .filter(|o| o.key.starts_with(&prefix))
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        objects
    }

    /// Total number of objects in the ledger.
    pub async fn object_count(&self) -> usize {
        self.ledger.read().await.len()
    }

    /// Record an object under `key`, or return the existing one.
    async fn upsert(&self, key: String, id_prefix: &str, detail: &str) -> (SimulatedObject, bool) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let mut ledger = self.ledger.write().await;
        if let Some(existing) = ledger.get(&key) {
            return (existing.clone(), false);
        }

        let object = SimulatedObject {
            key: key.clone(),
            external_id: format!("{}-{}", id_prefix, &uuid::Uuid::new_v4().simple().to_string()[..12]),
            detail: detail.to_string(),
        };
        ledger.insert(key, object.clone());
        (object, true)
    }
}

#[async_trait]
impl ResourceProvisioner for SimulatedInfrastructure {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn provision(
        &self,
        request_id: &str,
        spec: &ResourceSpec,
    ) -> Result<ProvisionResult, InfraError> {
        info!(
            "[SIMULATION] Provisioning {} for {} with template {}",
            spec.kind, request_id, spec.infrastructure_template
        );
        let key = resource_idempotency_key(request_id, spec);
        let (object, created) = self.upsert(key, "res", &spec.kind).await;
        Ok(ProvisionResult {
            resource_id: object.external_id,
            kind: spec.kind.clone(),
            created,
        })
    }
}

#[async_trait]
impl PipelineConfigurer for SimulatedInfrastructure {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn configure(&self, request_id: &str, ci_profile: &str) -> Result<ConfigResult, InfraError> {
        info!(
            "[SIMULATION] Configuring CI/CD pipeline for {} using profile {}",
            request_id, ci_profile
        );
        let (object, created) = self
            .upsert(pipeline_idempotency_key(request_id), "pipe", ci_profile)
            .await;
        Ok(ConfigResult {
            pipeline_id: object.external_id,
            profile: ci_profile.to_string(),
            created,
        })
    }
}

#[async_trait]
impl AgentDeployer for SimulatedInfrastructure {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn deploy(&self, request_id: &str, agent_policy: &str) -> Result<DeployResult, InfraError> {
        info!(
            "[SIMULATION] Deploying agents for {} with policy {}",
            request_id, agent_policy
        );
        let (object, created) = self
            .upsert(agents_idempotency_key(request_id), "agent", agent_policy)
            .await;
        Ok(DeployResult {
            deployment_id: object.external_id,
            policy: agent_policy.to_string(),
            created,
        })
    }
}
