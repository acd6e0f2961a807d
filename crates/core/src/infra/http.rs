//! HTTP client for an external Infrastructure Orchestration Engine.
//!
//! Every call is a `PUT` carrying an `Idempotency-Key` header so the engine can
//! deduplicate retried requests. Responses are `{"id": "...", "created": bool}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::HttpInfraConfig;
use super::error::InfraError;
use super::traits::{AgentDeployer, PipelineConfigurer, ResourceProvisioner};
use super::types::{
    agents_idempotency_key, pipeline_idempotency_key, resource_idempotency_key, ConfigResult,
    DeployResult, ProvisionResult, ResourceSpec,
};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: String,
    #[serde(default)]
    created: Option<bool>,
}

#[derive(Serialize)]
struct ResourceBody<'a> {
    kind: &'a str,
    infrastructure_template: &'a str,
}

#[derive(Serialize)]
struct PipelineBody<'a> {
    ci_cd_profile: &'a str,
}

#[derive(Serialize)]
struct AgentPolicyBody<'a> {
    agent_policy: &'a str,
}

/// HTTP implementation of all three leaf components.
pub struct HttpInfraClient {
    client: Client,
    config: HttpInfraConfig,
}

impl HttpInfraClient {
    /// Create a new client.
    pub fn new(config: HttpInfraConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InfraError::permanent(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<(String, bool), InfraError> {
        let url = format!("{}{}", self.base_url(), path);
        debug!("PUT {} ({}={})", url, IDEMPOTENCY_HEADER, idempotency_key);

        let mut request = self
            .client
            .put(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| InfraError::transient(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: ObjectResponse = serde_json::from_str(&text).map_err(|e| {
            InfraError::permanent(format!("unexpected response from {}: {}", path, e))
        })?;
        let created = parsed.created.unwrap_or(status == StatusCode::CREATED);
        Ok((parsed.id, created))
    }
}

/// Map a transport-level failure to an infrastructure error.
fn classify_send_error(e: reqwest::Error) -> InfraError {
    if e.is_timeout() {
        InfraError::transient("request timed out")
    } else if e.is_connect() {
        InfraError::transient(format!("connection failed: {}", e))
    } else if e.is_request() {
        InfraError::transient(format!("request failed: {}", e))
    } else {
        InfraError::permanent(e.to_string())
    }
}

/// Map a non-success HTTP status to an infrastructure error.
fn classify_status(status: StatusCode, body: &str) -> InfraError {
    let snippet: String = body.chars().take(200).collect();
    let reason = if snippet.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, snippet)
    };

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        InfraError::Transient(reason)
    } else {
        InfraError::Permanent(reason)
    }
}

#[async_trait]
impl ResourceProvisioner for HttpInfraClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn provision(
        &self,
        request_id: &str,
        spec: &ResourceSpec,
    ) -> Result<ProvisionResult, InfraError> {
        let (id, created) = self
            .put(
                &format!("/v1/environments/{}/resources", request_id),
                &resource_idempotency_key(request_id, spec),
                &ResourceBody {
                    kind: &spec.kind,
                    infrastructure_template: &spec.infrastructure_template,
                },
            )
            .await?;
        Ok(ProvisionResult {
            resource_id: id,
            kind: spec.kind.clone(),
            created,
        })
    }
}

#[async_trait]
impl PipelineConfigurer for HttpInfraClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn configure(&self, request_id: &str, ci_profile: &str) -> Result<ConfigResult, InfraError> {
        let (id, created) = self
            .put(
                &format!("/v1/environments/{}/pipeline", request_id),
                &pipeline_idempotency_key(request_id),
                &PipelineBody {
                    ci_cd_profile: ci_profile,
                },
            )
            .await?;
        Ok(ConfigResult {
            pipeline_id: id,
            profile: ci_profile.to_string(),
            created,
        })
    }
}

#[async_trait]
impl AgentDeployer for HttpInfraClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn deploy(&self, request_id: &str, agent_policy: &str) -> Result<DeployResult, InfraError> {
        let (id, created) = self
            .put(
                &format!("/v1/environments/{}/agent-policy", request_id),
                &agents_idempotency_key(request_id),
                &AgentPolicyBody { agent_policy },
            )
            .await?;
        Ok(DeployResult {
            deployment_id: id,
            policy: agent_policy.to_string(),
            created,
        })
    }
}
