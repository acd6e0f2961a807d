//! Orchestrator lifecycle integration tests.
//!
//! These tests verify the complete request lifecycle through the orchestrator:
//! pending -> provisioning_resources -> configuring_pipeline -> deploying_agents -> completed
//! and the failure, retry, cancellation and persistence paths around it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;

use perle_core::{
    infra::InfraError,
    orchestrator::RetryConfig,
    request::NewRequest,
    testing::{FailingRequestStore, MockInfra},
    CancelOutcome, ConfigCatalog, EnvironmentTrack, ExecutionMode, JsonFileRequestStore,
    OrchestratorConfig, OrchestratorError, ProvisioningOrchestrator, ProvisioningRequest,
    RequestFilter, RequestState, RequestStore, SqliteRequestStore, StepKind,
};

/// Test helper to create all dependencies for orchestrator testing.
struct TestHarness {
    store: Arc<dyn RequestStore>,
    mocks: MockInfra,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let store = Arc::new(SqliteRequestStore::new(&db_path).expect("Failed to create store"));
        Self::with_store(store, temp_dir)
    }

    fn with_store(store: Arc<dyn RequestStore>, temp_dir: TempDir) -> Self {
        Self {
            store,
            mocks: MockInfra::new(),
            _temp_dir: temp_dir,
        }
    }

    fn config(execution: ExecutionMode) -> OrchestratorConfig {
        OrchestratorConfig {
            execution,
            max_concurrent_requests: 4,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 5,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    fn create_orchestrator(&self, config: OrchestratorConfig) -> ProvisioningOrchestrator {
        ProvisioningOrchestrator::new(
            config,
            Arc::new(ConfigCatalog::builtin()),
            Arc::clone(&self.store),
            self.mocks.services(),
        )
    }

    fn background(&self) -> ProvisioningOrchestrator {
        self.create_orchestrator(Self::config(ExecutionMode::Background))
    }

    fn inline(&self) -> ProvisioningOrchestrator {
        self.create_orchestrator(Self::config(ExecutionMode::Inline))
    }

    async fn wait_for_state(&self, id: &str, expected: RequestState, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(request)) = self.store.get(id) {
                if request.state == expected {
                    return true;
                }
                if request.state.is_terminal() {
                    return false;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn wait_for_terminal(&self, id: &str) -> ProvisioningRequest {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if let Ok(Some(request)) = self.store.get(id) {
                if request.state.is_terminal() {
                    return request;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("request {} did not reach a terminal state", id);
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_demo_request_completes_with_three_steps() {
    let harness = TestHarness::new();
    let orchestrator = harness.background();

    let submitted = orchestrator
        .new_environment("demo", Some("demo-1"))
        .await
        .unwrap();
    assert_eq!(submitted.id, "demo-1");
    assert_eq!(submitted.state, RequestState::Pending);

    let done = harness.wait_for_terminal("demo-1").await;
    assert_eq!(done.state, RequestState::Completed);
    assert_eq!(done.steps.len(), 3);
    assert!(done.steps.iter().all(|s| s.is_success()));
    assert_eq!(
        done.steps.iter().map(|s| s.kind).collect::<Vec<_>>(),
        StepKind::ALL.to_vec()
    );
    assert!(done.reason.is_none());
    assert!(done.completed_at.is_some());

    let kinds: Vec<_> = harness
        .mocks
        .provisioner
        .recorded_calls()
        .await
        .into_iter()
        .map(|c| c.spec.kind)
        .collect();
    assert_eq!(kinds, vec!["Lambda", "DynamoDB (on-demand)", "API Gateway"]);
    assert_eq!(done.steps[0].artifacts.len(), 3);
}

#[tokio::test]
async fn test_unknown_track_creates_no_record() {
    let harness = TestHarness::new();
    let orchestrator = harness.background();

    let err = orchestrator
        .new_environment("bogus", Some("bogus-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::UnknownTrack(_)));
    assert!(err.to_string().contains("demo, customer, platform"));
    assert_eq!(harness.store.count(&RequestFilter::new()).unwrap(), 0);
    assert_eq!(harness.mocks.provisioner.call_count().await, 0);
}

#[tokio::test]
async fn test_pipeline_permanent_failure_is_partial() {
    let harness = TestHarness::new();
    harness
        .mocks
        .pipeline
        .set_next_error(InfraError::permanent("invalid CI/CD profile"))
        .await;
    let orchestrator = harness.background();

    orchestrator
        .new_environment("customer", Some("cust-1"))
        .await
        .unwrap();
    let done = harness.wait_for_terminal("cust-1").await;

    assert_eq!(done.state, RequestState::FailedPartial);
    assert_eq!(done.steps.len(), 2);
    assert!(done.steps[0].is_success());
    assert_eq!(done.steps[1].kind, StepKind::ConfigurePipeline);
    assert_eq!(done.steps[1].attempts, 1);
    assert!(done.steps[1]
        .failure_reason()
        .unwrap()
        .contains("invalid CI/CD profile"));
    assert!(done.reason.unwrap().contains("invalid CI/CD profile"));
    assert_eq!(harness.mocks.agents.call_count().await, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = TestHarness::new();
    harness
        .mocks
        .provisioner
        .fail_next(2, InfraError::transient("API throttled"))
        .await;
    let orchestrator = harness.inline();

    let done = orchestrator
        .new_environment("platform", Some("plat-1"))
        .await
        .unwrap();

    assert_eq!(done.state, RequestState::Completed);
    assert_eq!(done.steps[0].kind, StepKind::ProvisionResources);
    assert_eq!(done.steps[0].attempts, 3);
    // Two failed calls, then all five platform resources.
    assert_eq!(harness.mocks.provisioner.call_count().await, 7);
}

#[tokio::test]
async fn test_exhausted_retries_fail_request() {
    let harness = TestHarness::new();
    harness
        .mocks
        .provisioner
        .fail_next(3, InfraError::transient("connection reset"))
        .await;
    let orchestrator = harness.inline();

    let done = orchestrator
        .new_environment("demo", Some("demo-flaky"))
        .await
        .unwrap();

    assert_eq!(done.state, RequestState::Failed);
    assert_eq!(done.steps.len(), 1);
    assert_eq!(done.steps[0].attempts, 3);
    assert!(done.reason.unwrap().contains("retry budget exhausted"));
    assert_eq!(harness.mocks.pipeline.call_count().await, 0);
}

#[tokio::test]
async fn test_permanent_resource_failure_fails_request() {
    let harness = TestHarness::new();
    harness
        .mocks
        .provisioner
        .set_next_error(InfraError::permanent("quota exceeded"))
        .await;
    let orchestrator = harness.inline();

    let done = orchestrator
        .new_environment("demo", Some("demo-quota"))
        .await
        .unwrap();

    assert_eq!(done.state, RequestState::Failed);
    assert_eq!(done.steps.len(), 1);
    assert_eq!(done.steps[0].attempts, 1);
    assert!(done.steps[0].artifacts.is_empty());
    assert!(done.reason.as_deref().unwrap().contains("quota exceeded"));
    // Permanent errors are not retried.
    assert_eq!(harness.mocks.provisioner.call_count().await, 1);
}

#[tokio::test]
async fn test_observed_states_are_monotonic() {
    let harness = TestHarness::new();
    let seen: Arc<Mutex<Vec<(String, RequestState)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_for_callback = Arc::clone(&seen);

    let orchestrator = harness
        .inline()
        .with_update_callback(Arc::new(move |id: &str, state: RequestState| {
            seen_for_callback
                .lock()
                .unwrap()
                .push((id.to_string(), state));
        }));

    orchestrator
        .new_environment("customer", Some("cust-mono"))
        .await
        .unwrap();

    let states: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| id == "cust-mono")
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(
        states,
        vec![
            RequestState::Pending,
            RequestState::ProvisioningResources,
            RequestState::ConfiguringPipeline,
            RequestState::DeployingAgents,
            RequestState::Completed,
        ]
    );
    assert!(states.windows(2).all(|w| w[0].rank() < w[1].rank()));
}

#[tokio::test]
async fn test_concurrent_submissions_get_unique_ids() {
    let harness = TestHarness::new();
    let orchestrator = Arc::new(harness.background());

    let submissions = (0..20).map(|i| {
        let orchestrator = Arc::clone(&orchestrator);
        let track = ["demo", "customer", "platform"][i % 3];
        async move { orchestrator.new_environment(track, None).await }
    });
    let results = join_all(submissions).await;

    let ids: HashSet<_> = results
        .into_iter()
        .map(|r| r.expect("submission should succeed").id)
        .collect();
    assert_eq!(ids.len(), 20);
    assert_eq!(harness.store.count(&RequestFilter::new()).unwrap(), 20);

    for id in &ids {
        harness.wait_for_terminal(id).await;
    }
    assert_eq!(
        harness
            .store
            .count(&RequestFilter::new().with_state(RequestState::Completed))
            .unwrap(),
        20
    );
}

#[tokio::test]
async fn test_identifier_never_reused() {
    let harness = TestHarness::new();
    harness
        .mocks
        .provisioner
        .set_next_error(InfraError::permanent("invalid template"))
        .await;
    let orchestrator = harness.inline();

    let failed = orchestrator
        .new_environment("demo", Some("once"))
        .await
        .unwrap();
    assert_eq!(failed.state, RequestState::Failed);

    let err = orchestrator
        .new_environment("customer", Some("once"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateIdentifier(id) if id == "once"));
}

#[tokio::test]
async fn test_invalid_identifier_rejected() {
    let harness = TestHarness::new();
    let orchestrator = harness.background();

    for name in ["", "has space", "../escape", "-dash"] {
        let err = orchestrator
            .new_environment("demo", Some(name))
            .await
            .unwrap_err();
        assert!(
            matches!(err, OrchestratorError::InvalidIdentifier(_)),
            "{:?}",
            name
        );
    }
    assert_eq!(harness.store.count(&RequestFilter::new()).unwrap(), 0);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[tokio::test]
async fn test_persistence_failure_does_not_advance_state() {
    let temp_dir = TempDir::new().unwrap();
    let inner = Arc::new(SqliteRequestStore::new(&temp_dir.path().join("test.db")).unwrap());
    let failing = Arc::new(FailingRequestStore::new(inner));
    let harness = TestHarness::with_store(failing.clone(), temp_dir);
    let orchestrator = harness.inline();

    failing.set_fail_append_step(true);
    let err = orchestrator
        .new_environment("demo", Some("demo-db"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Stalled { ref request_id, .. } if request_id == "demo-db"
    ));
    assert!(err.to_string().contains("demo-db"));
    assert_eq!(failing.injected_failures(), 1);

    let stuck = harness.store.get("demo-db").unwrap().unwrap();
    assert_eq!(stuck.state, RequestState::ProvisioningResources);
    assert!(stuck.steps.is_empty());
    assert_eq!(harness.mocks.pipeline.call_count().await, 0);

    // Once the store recovers the request resumes; resources are not duplicated.
    failing.set_fail_append_step(false);
    assert_eq!(orchestrator.resume_incomplete().await.unwrap(), 1);
    let done = harness.wait_for_terminal("demo-db").await;

    assert_eq!(done.state, RequestState::Completed);
    assert_eq!(done.steps.len(), 3);
    assert_eq!(harness.mocks.provisioner.call_count().await, 6);
    assert_eq!(harness.mocks.provisioner.resource_count().await, 3);
}

#[tokio::test]
async fn test_recorded_failure_is_not_retried_on_resume() {
    let temp_dir = TempDir::new().unwrap();
    let inner = Arc::new(SqliteRequestStore::new(&temp_dir.path().join("test.db")).unwrap());
    let failing = Arc::new(FailingRequestStore::new(inner));
    let harness = TestHarness::with_store(failing.clone(), temp_dir);
    let orchestrator = harness.inline();

    failing.set_fail_terminal_transition(true);
    harness
        .mocks
        .provisioner
        .fail_next(1, InfraError::permanent("quota exceeded"))
        .await;

    let err = orchestrator
        .new_environment("demo", Some("d1"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Stalled { .. }));

    // The failure record landed, the terminal transition did not.
    let stuck = harness.store.get("d1").unwrap().unwrap();
    assert_eq!(stuck.state, RequestState::ProvisioningResources);
    assert_eq!(stuck.steps.len(), 1);
    assert!(!stuck.steps[0].is_success());

    failing.set_fail_terminal_transition(false);
    assert_eq!(orchestrator.resume_incomplete().await.unwrap(), 1);
    let done = harness.wait_for_terminal("d1").await;

    assert_eq!(done.state, RequestState::Failed);
    assert_eq!(done.steps.len(), 1);
    assert!(done.reason.as_deref().unwrap().contains("quota exceeded"));
    assert!(done.completed_at.is_some());
    assert_eq!(harness.mocks.provisioner.call_count().await, 1);
    assert_eq!(harness.mocks.pipeline.call_count().await, 0);
}

#[tokio::test]
async fn test_recorded_failure_after_success_resumes_as_partial() {
    let temp_dir = TempDir::new().unwrap();
    let inner = Arc::new(SqliteRequestStore::new(&temp_dir.path().join("test.db")).unwrap());
    let failing = Arc::new(FailingRequestStore::new(inner));
    let harness = TestHarness::with_store(failing.clone(), temp_dir);
    let orchestrator = harness.inline();

    failing.set_fail_terminal_transition(true);
    harness
        .mocks
        .pipeline
        .fail_next(1, InfraError::permanent("unknown ci/cd profile"))
        .await;

    orchestrator
        .new_environment("customer", Some("acme"))
        .await
        .unwrap_err();
    let stuck = harness.store.get("acme").unwrap().unwrap();
    assert_eq!(stuck.state, RequestState::ConfiguringPipeline);
    assert_eq!(stuck.steps.len(), 2);

    failing.set_fail_terminal_transition(false);
    orchestrator.resume_incomplete().await.unwrap();
    let done = harness.wait_for_terminal("acme").await;

    assert_eq!(done.state, RequestState::FailedPartial);
    assert_eq!(done.steps.len(), 2);
    assert!(done
        .reason
        .as_deref()
        .unwrap()
        .contains("unknown ci/cd profile"));
    assert_eq!(harness.mocks.provisioner.call_count().await, 4);
    assert_eq!(harness.mocks.pipeline.call_count().await, 1);
    assert_eq!(harness.mocks.agents.call_count().await, 0);
}

#[tokio::test]
async fn test_json_file_store_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let log_dir = temp_dir.path().join("env_provisioning_logs");
    let store = Arc::new(JsonFileRequestStore::new(&log_dir).unwrap());
    let harness = TestHarness::with_store(store, temp_dir);
    let orchestrator = harness.inline();

    let done = orchestrator
        .new_environment("platform", Some("plat-json"))
        .await
        .unwrap();
    assert_eq!(done.state, RequestState::Completed);

    let raw = std::fs::read_to_string(log_dir.join("plat-json.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["state"], "COMPLETED");
    assert_eq!(json["track"], "platform");
    assert_eq!(json["steps"].as_array().unwrap().len(), 3);
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_cancel_idle_pending_request() {
    let harness = TestHarness::new();
    harness
        .store
        .create(NewRequest {
            id: "idle".to_string(),
            track: EnvironmentTrack::Demo,
            template: ConfigCatalog::builtin().get(EnvironmentTrack::Demo).clone(),
        })
        .unwrap();
    let orchestrator = harness.background();

    let outcome = orchestrator
        .cancel("idle", Some("no longer needed".to_string()))
        .await
        .unwrap();

    let CancelOutcome::Cancelled(request) = outcome else {
        panic!("expected immediate cancellation");
    };
    assert_eq!(request.state, RequestState::Cancelled);
    assert_eq!(request.reason.as_deref(), Some("no longer needed"));
    assert!(request.steps.is_empty());
}

#[tokio::test]
async fn test_cancel_queued_request_is_immediate() {
    let harness = TestHarness::new();
    harness
        .mocks
        .provisioner
        .set_delay(Duration::from_millis(100))
        .await;
    let orchestrator = harness.create_orchestrator(OrchestratorConfig {
        max_concurrent_requests: 1,
        ..TestHarness::config(ExecutionMode::Background)
    });

    orchestrator
        .new_environment("demo", Some("first"))
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_state("first", RequestState::ProvisioningResources, Duration::from_secs(2))
            .await
    );
    orchestrator
        .new_environment("demo", Some("second"))
        .await
        .unwrap();

    let outcome = orchestrator.cancel("second", None).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Cancelled(_)));

    harness.wait_for_terminal("first").await;
    // Give the queued drive task a chance to pick up the slot.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = harness.store.get("second").unwrap().unwrap();
    assert_eq!(second.state, RequestState::Cancelled);
    assert!(second.steps.is_empty());
    let calls = harness.mocks.provisioner.recorded_calls().await;
    assert!(calls.iter().all(|c| c.request_id == "first"));
}

#[tokio::test]
async fn test_cancel_in_flight_request_at_step_boundary() {
    let harness = TestHarness::new();
    harness
        .mocks
        .provisioner
        .set_delay(Duration::from_millis(50))
        .await;
    let orchestrator = harness.background();

    orchestrator
        .new_environment("customer", Some("cust-cancel"))
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_state(
                "cust-cancel",
                RequestState::ProvisioningResources,
                Duration::from_secs(2)
            )
            .await
    );

    let outcome = orchestrator.cancel("cust-cancel", None).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Scheduled(_)));

    let done = harness.wait_for_terminal("cust-cancel").await;
    assert_eq!(done.state, RequestState::Cancelled);
    assert_eq!(done.reason.as_deref(), Some("cancelled by operator"));
    // The running step finished and was recorded; nothing after it ran.
    assert_eq!(done.steps.len(), 1);
    assert!(done.steps[0].is_success());
    assert_eq!(harness.mocks.pipeline.call_count().await, 0);
}

#[tokio::test]
async fn test_cancel_terminal_request_fails() {
    let harness = TestHarness::new();
    let orchestrator = harness.inline();
    orchestrator
        .new_environment("demo", Some("finished"))
        .await
        .unwrap();

    let err = orchestrator.cancel("finished", None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState { .. }));
}

// =============================================================================
// Recovery & Status Tests
// =============================================================================

#[tokio::test]
async fn test_start_resumes_interrupted_request() {
    let harness = TestHarness::new();
    let template = ConfigCatalog::builtin()
        .get(EnvironmentTrack::Customer)
        .clone();

    // Simulate a crash right after the resource step was recorded.
    harness
        .store
        .create(NewRequest {
            id: "cust-crash".to_string(),
            track: EnvironmentTrack::Customer,
            template,
        })
        .unwrap();
    harness
        .store
        .update_state("cust-crash", RequestState::ProvisioningResources, None)
        .unwrap();
    harness
        .store
        .append_step(
            "cust-crash",
            perle_core::StepRecord::success(
                StepKind::ProvisionResources,
                1,
                vec!["res-1".to_string()],
                chrono::Utc::now(),
            ),
        )
        .unwrap();

    let orchestrator = harness.background();
    orchestrator.start().await;
    let done = harness.wait_for_terminal("cust-crash").await;
    orchestrator.stop().await;

    assert_eq!(done.state, RequestState::Completed);
    assert_eq!(done.steps.len(), 3);
    assert_eq!(harness.mocks.provisioner.call_count().await, 0);
    assert_eq!(harness.mocks.pipeline.call_count().await, 1);
    assert_eq!(harness.mocks.agents.call_count().await, 1);
}

#[tokio::test]
async fn test_orchestrator_status_reflects_running_state() {
    let harness = TestHarness::new();
    let orchestrator = harness.inline();

    assert!(!orchestrator.orchestrator_status().await.running);
    orchestrator.start().await;
    assert!(orchestrator.orchestrator_status().await.running);

    orchestrator
        .new_environment("demo", Some("counted"))
        .await
        .unwrap();
    let status = orchestrator.orchestrator_status().await;
    assert_eq!(status.counts["completed"], 1);
    assert_eq!(status.counts["pending"], 0);
    assert!(status.in_flight.is_empty());

    orchestrator.stop().await;
    assert!(!orchestrator.orchestrator_status().await.running);
}

#[tokio::test]
async fn test_orchestrator_status_survives_count_failure() {
    let temp_dir = TempDir::new().unwrap();
    let inner = Arc::new(SqliteRequestStore::new(&temp_dir.path().join("test.db")).unwrap());
    let failing = Arc::new(FailingRequestStore::new(inner));
    let harness = TestHarness::with_store(failing.clone(), temp_dir);
    let orchestrator = harness.inline();
    orchestrator.start().await;

    orchestrator
        .new_environment("demo", Some("counted"))
        .await
        .unwrap();

    failing.set_fail_count(true);
    let status = orchestrator.orchestrator_status().await;
    assert!(status.running);
    assert_eq!(status.counts.len(), RequestState::ALL.len());
    assert!(status.counts.values().all(|&count| count == 0));
    assert_eq!(failing.injected_failures(), RequestState::ALL.len());

    failing.set_fail_count(false);
    let status = orchestrator.orchestrator_status().await;
    assert_eq!(status.counts["completed"], 1);

    orchestrator.stop().await;
}
