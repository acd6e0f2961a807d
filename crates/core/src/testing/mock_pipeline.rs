//! Mock pipeline configurer for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::Script;
use crate::infra::{ConfigResult, InfraError, PipelineConfigurer};

/// A recorded configure call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedConfigure {
    pub request_id: String,
    pub ci_profile: String,
    pub success: bool,
}

/// Mock implementation of the PipelineConfigurer trait.
#[derive(Debug, Default)]
pub struct MockPipelineConfigurer {
    calls: Arc<RwLock<Vec<RecordedConfigure>>>,
    script: Script,
}

impl MockPipelineConfigurer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls.
    pub async fn recorded_calls(&self) -> Vec<RecordedConfigure> {
        self.calls.read().await.clone()
    }

    /// Get the number of calls made.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Make the next `count` calls fail with `error`.
    pub async fn fail_next(&self, count: usize, error: InfraError) {
        self.script.push_errors(count, error).await;
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: InfraError) {
        self.fail_next(1, error).await;
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        self.script.set_delay(delay).await;
    }
}

#[async_trait]
impl PipelineConfigurer for MockPipelineConfigurer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn configure(&self, request_id: &str, ci_profile: &str) -> Result<ConfigResult, InfraError> {
        let error = self.script.next().await;
        let mut calls = self.calls.write().await;
        let created = !calls
            .iter()
            .any(|c| c.success && c.request_id == request_id);
        calls.push(RecordedConfigure {
            request_id: request_id.to_string(),
            ci_profile: ci_profile.to_string(),
            success: error.is_none(),
        });
        if let Some(err) = error {
            return Err(err);
        }

        Ok(ConfigResult {
            pipeline_id: format!("mock-pipeline-{}", request_id),
            profile: ci_profile.to_string(),
            created,
        })
    }
}
