//! Provisioning orchestrator implementation.
//!
//! Each request is driven by its own task through
//! `Pending -> ProvisioningResources -> ConfiguringPipeline -> DeployingAgents -> Completed`:
//! - Steps of one request run strictly in order
//! - Different requests run concurrently, bounded by a semaphore
//! - Every step outcome is persisted before the request advances

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::catalog::{ConfigCatalog, EnvironmentTrack};
use crate::infra::{InfraError, InfraServices, ResourceSpec};
use crate::metrics;
use crate::request::{
    generate_id, is_valid_id, NewRequest, ProvisioningRequest, RequestFilter, RequestState,
    RequestStore, StepKind, StepRecord, StoreError,
};

use super::config::{ExecutionMode, OrchestratorConfig, RetryConfig};
use super::types::{ActiveRequest, CancelOutcome, OrchestratorError, OrchestratorStatus};

/// Callback invoked after every persisted state transition.
pub type RequestUpdateCallback = Arc<dyn Fn(&str, RequestState) + Send + Sync>;

/// Reason recorded when a cancellation carries none.
const DEFAULT_CANCEL_REASON: &str = "cancelled by operator";

/// How long `stop` waits for in-flight requests to reach a boundary.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Why driving a request stopped before a terminal state.
#[derive(Debug)]
enum Interrupted {
    /// A write failed; the request stays in its last persisted state.
    Store(StoreError),
    /// The orchestrator is shutting down.
    Shutdown,
}

impl From<StoreError> for Interrupted {
    fn from(e: StoreError) -> Self {
        Interrupted::Store(e)
    }
}

/// Result of one step after retries.
struct StepRun {
    attempts: u32,
    artifacts: Vec<String>,
    error: Option<InfraError>,
}

/// Everything a drive task needs, cheap to clone into `tokio::spawn`.
#[derive(Clone)]
struct Driver {
    store: Arc<dyn RequestStore>,
    infra: InfraServices,
    retry: RetryConfig,
    semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashMap<String, ActiveRequest>>>,
    shutting_down: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    update_callback: Option<RequestUpdateCallback>,
}

/// The provisioning orchestrator - owns the lifecycle of every request.
pub struct ProvisioningOrchestrator {
    config: OrchestratorConfig,
    catalog: Arc<ConfigCatalog>,
    driver: Driver,
    running: Arc<AtomicBool>,
}

impl ProvisioningOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<ConfigCatalog>,
        store: Arc<dyn RequestStore>,
        infra: InfraServices,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Self {
            driver: Driver {
                store,
                infra,
                retry: config.retry.clone(),
                semaphore,
                active: Arc::new(RwLock::new(HashMap::new())),
                shutting_down: Arc::new(AtomicBool::new(false)),
                shutdown_tx,
                update_callback: None,
            },
            config,
            catalog,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set a callback to be notified of state transitions.
    pub fn with_update_callback(mut self, callback: RequestUpdateCallback) -> Self {
        self.driver.update_callback = Some(callback);
        self
    }

    /// The catalog requests are resolved against.
    pub fn catalog(&self) -> &ConfigCatalog {
        &self.catalog
    }

    /// Start the orchestrator, resuming interrupted requests if configured.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting provisioning orchestrator");
        self.driver.shutting_down.store(false, Ordering::SeqCst);

        if self.config.resume_on_start {
            match self.resume_incomplete().await {
                Ok(0) => {}
                Ok(n) => info!("Resumed {} incomplete requests", n),
                Err(e) => error!("Failed to resume incomplete requests: {}", e),
            }
        }

        info!("Provisioning orchestrator started");
    }

    /// Stop the orchestrator gracefully.
    ///
    /// In-flight requests stop at their next step boundary or backoff sleep
    /// and stay in their current state until resumed.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping provisioning orchestrator");
        self.driver.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.driver.shutdown_tx.send(());

        let deadline = Instant::now() + STOP_GRACE;
        while !self.driver.active.read().await.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.driver.active.read().await.len();
        if remaining > 0 {
            warn!("{} requests still in flight at shutdown", remaining);
        }
        info!("Provisioning orchestrator stopped");
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Submit a new environment request.
    ///
    /// Resolves the track, validates or generates the identifier and persists
    /// the request in `Pending`. In background mode the pending snapshot is
    /// returned right away; in inline mode the terminal snapshot is returned.
    pub async fn new_environment(
        &self,
        track: &str,
        name: Option<&str>,
    ) -> Result<ProvisioningRequest, OrchestratorError> {
        let track: EnvironmentTrack = track.parse()?;
        let template = self.catalog.get(track).clone();

        let request = match name {
            Some(name) => {
                if !is_valid_id(name) {
                    return Err(OrchestratorError::InvalidIdentifier(name.to_string()));
                }
                self.create_request(name.to_string(), track, template)?
            }
            None => self.create_with_generated_id(track, template)?,
        };

        metrics::SUBMISSIONS.with_label_values(&[track.as_str()]).inc();
        info!("Accepted environment request {} (track {})", request.id, track);
        self.driver.notify(&request.id, request.state);

        match self.config.execution {
            ExecutionMode::Background => {
                self.spawn_drive(request.id.clone());
                Ok(request)
            }
            ExecutionMode::Inline => {
                let driver = self.driver.clone();
                match driver.drive(&request.id).await {
                    Ok(Some(done)) => Ok(done),
                    Ok(None) => self.status(&request.id),
                    Err(Interrupted::Store(source)) => Err(OrchestratorError::Stalled {
                        request_id: request.id.clone(),
                        source,
                    }),
                    Err(Interrupted::Shutdown) => self.status(&request.id),
                }
            }
        }
    }

    fn create_request(
        &self,
        id: String,
        track: EnvironmentTrack,
        template: crate::catalog::Template,
    ) -> Result<ProvisioningRequest, OrchestratorError> {
        self.driver
            .store
            .create(NewRequest {
                id,
                track,
                template,
            })
            .map_err(|e| match e {
                StoreError::Duplicate(id) => OrchestratorError::DuplicateIdentifier(id),
                other => {
                    metrics::PERSISTENCE_FAILURES.inc();
                    OrchestratorError::Persistence(other)
                }
            })
    }

    fn create_with_generated_id(
        &self,
        track: EnvironmentTrack,
        template: crate::catalog::Template,
    ) -> Result<ProvisioningRequest, OrchestratorError> {
        let attempts = self.config.max_id_attempts.max(1);
        let mut last_id = String::new();

        for _ in 0..attempts {
            last_id = generate_id(track);
            match self.create_request(last_id.clone(), track, template.clone()) {
                Err(OrchestratorError::DuplicateIdentifier(id)) => {
                    debug!("Generated identifier {} collided, retrying", id);
                }
                other => return other,
            }
        }

        Err(OrchestratorError::DuplicateIdentifier(last_id))
    }

    fn spawn_drive(&self, id: String) {
        let driver = self.driver.clone();
        tokio::spawn(async move {
            match driver.drive(&id).await {
                Ok(_) => {}
                Err(Interrupted::Shutdown) => {
                    info!("Request {} interrupted by shutdown, will resume on start", id)
                }
                Err(Interrupted::Store(e)) => {
                    error!("Stopped driving request {}: {}", id, e)
                }
            }
        });
    }

    /// Get a request snapshot.
    pub fn status(&self, id: &str) -> Result<ProvisioningRequest, OrchestratorError> {
        self.driver
            .store
            .get(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// List requests, newest first.
    pub fn list(&self, filter: &RequestFilter) -> Result<Vec<ProvisioningRequest>, OrchestratorError> {
        Ok(self.driver.store.list(filter)?)
    }

    /// Count requests matching a filter.
    pub fn count(&self, filter: &RequestFilter) -> Result<i64, OrchestratorError> {
        Ok(self.driver.store.count(filter)?)
    }

    /// Cancel a request.
    ///
    /// An idle request is cancelled at once. A request being driven is
    /// flagged and stops at its next step boundary; an in-flight external
    /// call is never interrupted.
    pub async fn cancel(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> Result<CancelOutcome, OrchestratorError> {
        let reason = reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

        // Drive tasks register under the same lock, so a request is either
        // flagged here or cancelled before its driver looks at it.
        let mut active = self.driver.active.write().await;

        let request = self.status(id)?;
        if request.state.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                request_id: id.to_string(),
                state: request.state,
            });
        }

        if let Some(entry) = active.get_mut(id) {
            info!("Cancellation of request {} scheduled: {}", id, reason);
            entry.cancel_requested = Some(reason);
            return Ok(CancelOutcome::Scheduled(request));
        }

        let cancelled = self
            .driver
            .persist_transition(id, RequestState::Cancelled, Some(reason))?;
        drop(active);

        info!("Request {} cancelled", id);
        Ok(CancelOutcome::Cancelled(cancelled))
    }

    /// Resume every non-terminal request that is not already being driven.
    ///
    /// Returns the number of requests scheduled.
    pub async fn resume_incomplete(&self) -> Result<usize, OrchestratorError> {
        // Collect first: spawned drives move requests between states, which
        // would shift the pages below.
        let mut pending = Vec::new();
        for state in RequestState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let mut offset = 0;
            loop {
                let page = self.driver.store.list(
                    &RequestFilter::new()
                        .with_state(state)
                        .with_limit(100)
                        .with_offset(offset),
                )?;
                if page.is_empty() {
                    break;
                }
                offset += page.len() as i64;
                pending.extend(page.into_iter().map(|r| (r.id, r.state)));
            }
        }

        let active = self.driver.active.read().await;
        pending.retain(|(id, _)| !active.contains_key(id));
        drop(active);

        for (id, state) in &pending {
            info!("Resuming request {} from state {}", id, state);
            self.spawn_drive(id.clone());
        }

        Ok(pending.len())
    }

    /// Get current orchestrator status.
    pub async fn orchestrator_status(&self) -> OrchestratorStatus {
        let mut in_flight: Vec<_> = self.driver.active.read().await.values().cloned().collect();
        in_flight.sort_by(|a, b| a.started_at.cmp(&b.started_at));

        let counts = RequestState::ALL
            .into_iter()
            .map(|state| {
                let count = match self
                    .driver
                    .store
                    .count(&RequestFilter::new().with_state(state))
                {
                    Ok(count) => count,
                    Err(e) => {
                        warn!("Failed to count {} requests: {}", state, e);
                        0
                    }
                };
                (state.as_str().to_string(), count)
            })
            .collect();

        OrchestratorStatus {
            running: self.is_running(),
            max_concurrent_requests: self.config.max_concurrent_requests,
            in_flight,
            counts,
        }
    }
}

impl Driver {
    fn notify(&self, id: &str, state: RequestState) {
        if let Some(callback) = &self.update_callback {
            callback(id, state);
        }
    }

    fn persist_transition(
        &self,
        id: &str,
        next: RequestState,
        reason: Option<String>,
    ) -> Result<ProvisioningRequest, StoreError> {
        let request = self.store.update_state(id, next, reason).map_err(|e| {
            metrics::PERSISTENCE_FAILURES.inc();
            e
        })?;

        debug!("Request {} -> {}", id, next);
        if next.is_terminal() {
            metrics::REQUESTS_FINISHED
                .with_label_values(&[request.track.as_str(), next.as_str()])
                .inc();
        }
        self.notify(id, next);
        Ok(request)
    }

    fn persist_step(&self, id: &str, record: StepRecord) -> Result<ProvisioningRequest, StoreError> {
        self.store.append_step(id, record).map_err(|e| {
            metrics::PERSISTENCE_FAILURES.inc();
            e
        })
    }

    /// Drive a request to a terminal state.
    ///
    /// Returns `Ok(None)` when another task already drives the request.
    async fn drive(&self, id: &str) -> Result<Option<ProvisioningRequest>, Interrupted> {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(Interrupted::Shutdown),
        };

        {
            let mut active = self.active.write().await;
            if active.contains_key(id) {
                debug!("Request {} is already being driven", id);
                return Ok(None);
            }
            active.insert(
                id.to_string(),
                ActiveRequest {
                    request_id: id.to_string(),
                    started_at: Utc::now(),
                    cancel_requested: None,
                },
            );
        }
        metrics::REQUESTS_IN_FLIGHT.inc();

        let result = self.run_steps(id).await;

        self.active.write().await.remove(id);
        metrics::REQUESTS_IN_FLIGHT.dec();

        match &result {
            Ok(request) => info!(
                "Request {} finished in state {}{}",
                request.id,
                request.state,
                request
                    .reason
                    .as_deref()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default()
            ),
            Err(Interrupted::Store(e)) => {
                error!("Persistence failure while driving request {}: {}", id, e)
            }
            Err(Interrupted::Shutdown) => {}
        }

        result.map(Some)
    }

    async fn cancel_reason(&self, id: &str) -> Option<String> {
        self.active
            .read()
            .await
            .get(id)
            .and_then(|a| a.cancel_requested.clone())
    }

    async fn run_steps(&self, id: &str) -> Result<ProvisioningRequest, Interrupted> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut request = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if request.state.is_terminal() {
            return Ok(request);
        }

        // A recorded failure is final even if the terminal transition was
        // never persisted; only that transition is left to do.
        if let Some(failed) = request.steps.last().filter(|s| !s.is_success()) {
            let reason = failed
                .failure_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} failed", failed.kind));
            let next = if request.any_step_succeeded() {
                RequestState::FailedPartial
            } else {
                RequestState::Failed
            };
            info!("Request {} already failed at {}, finishing as {}", id, failed.kind, next);
            return Ok(self.persist_transition(id, next, Some(reason))?);
        }

        for kind in StepKind::ALL {
            if request.step_succeeded(kind) {
                continue;
            }

            if let Some(reason) = self.cancel_reason(id).await {
                info!("Honouring cancellation of request {} before {}", id, kind);
                return Ok(self.persist_transition(id, RequestState::Cancelled, Some(reason))?);
            }
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(Interrupted::Shutdown);
            }

            if request.state.rank() < kind.state().rank() {
                request = self.persist_transition(id, kind.state(), None)?;
            }

            let started_at = Utc::now();
            let timer = Instant::now();
            let run = self.run_step(&request, kind, &mut shutdown_rx).await?;

            match run.error {
                None => {
                    metrics::STEP_DURATION
                        .with_label_values(&[kind.as_str(), "success"])
                        .observe(timer.elapsed().as_secs_f64());
                    request = self.persist_step(
                        id,
                        StepRecord::success(kind, run.attempts, run.artifacts, started_at),
                    )?;
                }
                Some(err) => {
                    metrics::STEP_DURATION
                        .with_label_values(&[kind.as_str(), "failure"])
                        .observe(timer.elapsed().as_secs_f64());

                    let reason = if err.is_retryable() {
                        format!(
                            "{} failed, retry budget exhausted after {} attempts: {}",
                            kind,
                            run.attempts,
                            err.reason()
                        )
                    } else {
                        format!("{} failed: {}", kind, err.reason())
                    };
                    warn!("Request {}: {}", id, reason);

                    request = self.persist_step(
                        id,
                        StepRecord::failure(
                            kind,
                            run.attempts,
                            reason.clone(),
                            run.artifacts,
                            started_at,
                        ),
                    )?;

                    let next = if request.any_step_succeeded() {
                        RequestState::FailedPartial
                    } else {
                        RequestState::Failed
                    };
                    return Ok(self.persist_transition(id, next, Some(reason))?);
                }
            }
        }

        Ok(self.persist_transition(id, RequestState::Completed, None)?)
    }

    /// Run one step, retrying transient failures with exponential backoff.
    async fn run_step(
        &self,
        request: &ProvisioningRequest,
        kind: StepKind,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<StepRun, Interrupted> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            metrics::STEP_ATTEMPTS.with_label_values(&[kind.as_str()]).inc();
            debug!("Request {}: {} attempt {}", request.id, kind, attempts);

            let (artifacts, error) = self.attempt_step(request, kind).await;
            let Some(err) = error else {
                return Ok(StepRun {
                    attempts,
                    artifacts,
                    error: None,
                });
            };

            if !err.is_retryable() || attempts >= max_attempts {
                return Ok(StepRun {
                    attempts,
                    artifacts,
                    error: Some(err),
                });
            }

            let delay = self.retry.delay_for(attempts);
            metrics::STEP_RETRIES.with_label_values(&[kind.as_str()]).inc();
            warn!(
                "Request {}: {} attempt {}/{} failed ({}), retrying in {:?}",
                request.id, kind, attempts, max_attempts, err, delay
            );

            tokio::select! {
                _ = shutdown_rx.recv() => return Err(Interrupted::Shutdown),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Perform a single attempt of a step.
    ///
    /// Returns the artifacts produced so far and the error that ended the
    /// attempt, if any.
    async fn attempt_step(
        &self,
        request: &ProvisioningRequest,
        kind: StepKind,
    ) -> (Vec<String>, Option<InfraError>) {
        let template = &request.template;
        let mut artifacts = Vec::new();

        match kind {
            StepKind::ProvisionResources => {
                let backend = self.infra.provisioner.name().to_string();
                for resource in &template.resources {
                    let spec = ResourceSpec::new(resource, &template.infrastructure_template);
                    let timer = Instant::now();
                    let result = self.infra.provisioner.provision(&request.id, &spec).await;
                    record_call(&backend, "provision", timer, result.as_ref().err());
                    match result {
                        Ok(res) => artifacts.push(res.resource_id),
                        Err(e) => return (artifacts, Some(e)),
                    }
                }
            }
            StepKind::ConfigurePipeline => {
                let backend = self.infra.pipeline.name().to_string();
                let timer = Instant::now();
                let result = self
                    .infra
                    .pipeline
                    .configure(&request.id, &template.ci_cd_profile)
                    .await;
                record_call(&backend, "configure", timer, result.as_ref().err());
                match result {
                    Ok(res) => artifacts.push(res.pipeline_id),
                    Err(e) => return (artifacts, Some(e)),
                }
            }
            StepKind::DeployAgents => {
                let backend = self.infra.agents.name().to_string();
                let timer = Instant::now();
                let result = self
                    .infra
                    .agents
                    .deploy(&request.id, &template.agent_policy)
                    .await;
                record_call(&backend, "deploy", timer, result.as_ref().err());
                match result {
                    Ok(res) => artifacts.push(res.deployment_id),
                    Err(e) => return (artifacts, Some(e)),
                }
            }
        }

        (artifacts, None)
    }
}

fn record_call(backend: &str, operation: &str, timer: Instant, error: Option<&InfraError>) {
    let result = match error {
        None => "success",
        Some(e) if e.is_retryable() => "transient",
        Some(_) => "permanent",
    };
    metrics::INFRA_CALL_DURATION
        .with_label_values(&[backend, operation])
        .observe(timer.elapsed().as_secs_f64());
    metrics::INFRA_CALLS
        .with_label_values(&[backend, operation, result])
        .inc();
}
