use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::catalog::{EnvironmentTrack, Template};
use crate::infra::{InfraBackend, InfraConfig, SimulatedConfig};
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub infrastructure: InfraConfig,
    /// Template overrides, keyed by track name.
    #[serde(default)]
    pub tracks: BTreeMap<EnvironmentTrack, Template>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Which request store to use.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    JsonFiles,
}

/// Request store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite database file (backend = "sqlite").
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Directory of per-request JSON documents (backend = "json_files").
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("perle.db")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("env_provisioning_logs")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub orchestrator: OrchestratorConfig,
    pub infrastructure: SanitizedInfraConfig,
    /// Tracks with a configured override.
    pub overridden_tracks: Vec<EnvironmentTrack>,
}

/// Sanitized infrastructure config (API token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedInfraConfig {
    pub backend: InfraBackend,
    pub simulated: SimulatedConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<SanitizedHttpInfraConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedHttpInfraConfig {
    pub url: String,
    pub api_token_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let infra = &config.infrastructure;
        Self {
            server: config.server.clone(),
            storage: config.storage.clone(),
            orchestrator: config.orchestrator.clone(),
            infrastructure: SanitizedInfraConfig {
                backend: infra.backend,
                simulated: infra.simulated.clone(),
                http: infra.http.as_ref().map(|h| SanitizedHttpInfraConfig {
                    url: h.url.clone(),
                    api_token_configured: h.api_token.as_deref().map_or(false, |t| !t.is_empty()),
                    timeout_secs: h.timeout_secs,
                }),
            },
            overridden_tracks: config.tracks.keys().copied().collect(),
        }
    }
}
