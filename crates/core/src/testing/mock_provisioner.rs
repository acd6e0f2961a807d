//! Mock resource provisioner for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::Script;
use crate::infra::{InfraError, ProvisionResult, ResourceProvisioner, ResourceSpec};

/// A recorded provision call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedProvision {
    /// Request the call was made for.
    pub request_id: String,
    /// Resource that was requested.
    pub spec: ResourceSpec,
    /// Whether the call succeeded.
    pub success: bool,
}

/// Mock implementation of the ResourceProvisioner trait.
///
/// Provides controllable behavior for testing:
/// - Track calls for assertions
/// - Script transient or permanent failures
/// - Idempotent results (a repeated call reports `created = false`)
#[derive(Debug, Default)]
pub struct MockResourceProvisioner {
    calls: Arc<RwLock<Vec<RecordedProvision>>>,
    existing: Arc<RwLock<HashSet<String>>>,
    script: Script,
}

impl MockResourceProvisioner {
    /// Create a new mock provisioner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls.
    pub async fn recorded_calls(&self) -> Vec<RecordedProvision> {
        self.calls.read().await.clone()
    }

    /// Get the number of calls made.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Number of distinct resources created.
    pub async fn resource_count(&self) -> usize {
        self.existing.read().await.len()
    }

    /// Make the next `count` calls fail with `error`.
    pub async fn fail_next(&self, count: usize, error: InfraError) {
        self.script.push_errors(count, error).await;
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: InfraError) {
        self.fail_next(1, error).await;
    }

    /// Clear any scripted errors.
    pub async fn clear_errors(&self) {
        self.script.clear().await;
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        self.script.set_delay(delay).await;
    }
}

#[async_trait]
impl ResourceProvisioner for MockResourceProvisioner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn provision(
        &self,
        request_id: &str,
        spec: &ResourceSpec,
    ) -> Result<ProvisionResult, InfraError> {
        let error = self.script.next().await;
        self.calls.write().await.push(RecordedProvision {
            request_id: request_id.to_string(),
            spec: spec.clone(),
            success: error.is_none(),
        });
        if let Some(err) = error {
            return Err(err);
        }

        let resource_id = format!("mock-res-{}-{}", request_id, spec.kind);
        let created = self.existing.write().await.insert(resource_id.clone());
        Ok(ProvisionResult {
            resource_id,
            kind: spec.kind.clone(),
            created,
        })
    }
}
