//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the router in-process
//! with mock infrastructure injected, so the HTTP surface can be exercised
//! without a listening socket or real infrastructure.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use perle_core::config::ServerConfig;
use perle_core::orchestrator::RetryConfig;
use perle_core::testing::{FailingRequestStore, MockInfra};
use perle_core::{
    Config, ConfigCatalog, ExecutionMode, OrchestratorConfig, ProvisioningOrchestrator,
    RequestStore, SqliteRequestStore, StorageConfig,
};
use perle_server::state::AppState;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/environments", json!({
///         "track": "demo"
///     })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Orchestrator behind the router
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    /// Mock infrastructure leaves
    pub mocks: MockInfra,
    /// Request store that can be told to fail
    pub store: Arc<FailingRequestStore>,
    /// Temporary directory holding the request database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a new test fixture with default settings.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mocks = MockInfra::new();

        let orchestrator_config = OrchestratorConfig {
            execution: test_config.execution,
            max_concurrent_requests: test_config.max_concurrent_requests,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 5,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        };

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 8080, // Not used for in-process testing
            },
            storage: StorageConfig {
                path: db_path.clone(),
                ..Default::default()
            },
            orchestrator: orchestrator_config.clone(),
            ..Default::default()
        };

        let inner: Arc<dyn RequestStore> =
            Arc::new(SqliteRequestStore::new(&db_path).expect("Failed to create store"));
        let store = Arc::new(FailingRequestStore::new(inner));

        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            orchestrator_config,
            Arc::new(ConfigCatalog::builtin()),
            Arc::clone(&store) as Arc<dyn RequestStore>,
            mocks.services(),
        ));
        orchestrator.start().await;

        let state = Arc::new(AppState::new(config, Arc::clone(&orchestrator)));
        let router = perle_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            mocks,
            store,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a DELETE request with JSON body.
    pub async fn delete_with_body(&self, path: &str, body: Value) -> TestResponse {
        self.request("DELETE", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Poll an environment until it reaches `state` or the timeout elapses.
    pub async fn wait_for_state(&self, id: &str, state: &str) -> TestResponse {
        let path = format!("/api/v1/environments/{}", id);
        let mut response = self.get(&path).await;
        for _ in 0..200 {
            if response.body["state"] == state {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            response = self.get(&path).await;
        }
        response
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub execution: ExecutionMode,
    pub max_concurrent_requests: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::Background,
            max_concurrent_requests: 4,
        }
    }
}

impl TestConfig {
    /// Drive submissions before answering.
    pub fn inline() -> Self {
        Self {
            execution: ExecutionMode::Inline,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
