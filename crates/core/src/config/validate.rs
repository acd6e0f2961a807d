use super::{types::Config, ConfigError};
use crate::catalog::ConfigCatalog;
use crate::infra::InfraBackend;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Retry budget and backoff are usable
/// - Worker pool is not empty
/// - HTTP infrastructure backend has a URL
/// - Track overrides are complete
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    let orchestrator = &config.orchestrator;
    if orchestrator.max_concurrent_requests == 0 {
        return invalid("orchestrator.max_concurrent_requests must be at least 1");
    }
    if orchestrator.retry.max_attempts == 0 {
        return invalid("orchestrator.retry.max_attempts must be at least 1");
    }
    if orchestrator.retry.backoff_multiplier < 1.0 {
        return invalid("orchestrator.retry.backoff_multiplier must be >= 1.0");
    }
    if orchestrator.retry.max_delay_ms < orchestrator.retry.initial_delay_ms {
        return invalid("orchestrator.retry.max_delay_ms must be >= initial_delay_ms");
    }

    if config.infrastructure.backend == InfraBackend::Http {
        match &config.infrastructure.http {
            Some(http) if !http.url.trim().is_empty() => {}
            _ => return invalid("infrastructure.http.url is required when backend = \"http\""),
        }
    }

    ConfigCatalog::with_overrides(&config.tracks)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EnvironmentTrack, Template};
    use crate::infra::HttpInfraConfig;

    fn assert_invalid(config: &Config) {
        let err = validate_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = Config::default();
        config.orchestrator.retry.max_attempts = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.orchestrator.max_concurrent_requests = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_shrinking_backoff_fails() {
        let mut config = Config::default();
        config.orchestrator.retry.backoff_multiplier = 0.5;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_http_backend_requires_url() {
        let mut config = Config::default();
        config.infrastructure.backend = InfraBackend::Http;
        assert_invalid(&config);

        config.infrastructure.http = Some(HttpInfraConfig {
            url: "http://ioe.internal".to_string(),
            api_token: None,
            timeout_secs: 30,
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_override_resources_fails() {
        let mut config = Config::default();
        config.tracks.insert(
            EnvironmentTrack::Customer,
            Template {
                description: "no resources".to_string(),
                infrastructure_template: "aws.json".to_string(),
                ci_cd_profile: "ci.json".to_string(),
                agent_policy: "agents.json".to_string(),
                resources: vec![],
            },
        );
        assert_invalid(&config);
    }
}
