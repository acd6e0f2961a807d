//! Configuration for the infrastructure backends.

use serde::{Deserialize, Serialize};

/// Which implementation backs the three leaf components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraBackend {
    /// In-process ledger, nothing external is touched.
    #[default]
    Simulated,
    /// Infrastructure Orchestration Engine reached over HTTP.
    Http,
}

/// Infrastructure configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: InfraBackend,

    /// Simulated backend settings.
    #[serde(default)]
    pub simulated: SimulatedConfig,

    /// HTTP backend settings (required when backend = "http").
    #[serde(default)]
    pub http: Option<HttpInfraConfig>,
}

/// Settings for the simulated backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Artificial latency added to every call (milliseconds).
    #[serde(default)]
    pub latency_ms: u64,
}

/// Settings for the HTTP backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpInfraConfig {
    /// Base URL of the orchestration engine (e.g., "http://ioe.internal:8443").
    pub url: String,

    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}
