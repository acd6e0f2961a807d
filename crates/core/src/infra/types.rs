//! Types exchanged with the infrastructure leaf components.

use serde::{Deserialize, Serialize};

/// One unit of infrastructure to create or verify.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource kind, e.g. "Lambda" or "EKS (Multi-AZ)".
    pub kind: String,
    /// Infrastructure template the resource is declared in.
    pub infrastructure_template: String,
}

impl ResourceSpec {
    /// Create a new resource spec.
    pub fn new(kind: impl Into<String>, infrastructure_template: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            infrastructure_template: infrastructure_template.into(),
        }
    }
}

/// Result of provisioning one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResult {
    /// External identifier of the resource.
    pub resource_id: String,
    /// Resource kind that was provisioned.
    pub kind: String,
    /// False when the resource already existed for this idempotency token.
    pub created: bool,
}

/// Result of configuring the CI/CD pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResult {
    /// External identifier of the pipeline.
    pub pipeline_id: String,
    /// Profile the pipeline was configured from.
    pub profile: String,
    /// False when the pipeline already existed for this idempotency token.
    pub created: bool,
}

/// Result of applying an agent policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    /// External identifier of the agent deployment.
    pub deployment_id: String,
    /// Policy that was applied.
    pub policy: String,
    /// False when the policy was already applied for this idempotency token.
    pub created: bool,
}

/// Idempotency key sent to external services for a resource.
pub fn resource_idempotency_key(request_id: &str, spec: &ResourceSpec) -> String {
    format!("{}:resource:{}", request_id, spec.kind)
}

/// Idempotency key sent to external services for the pipeline.
pub fn pipeline_idempotency_key(request_id: &str) -> String {
    format!("{}:pipeline", request_id)
}

/// Idempotency key sent to external services for the agent policy.
pub fn agents_idempotency_key(request_id: &str) -> String {
    format!("{}:agents", request_id)
}
