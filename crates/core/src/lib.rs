pub mod catalog;
pub mod config;
pub mod infra;
pub mod metrics;
pub mod orchestrator;
pub mod request;
pub mod testing;

pub use catalog::{CatalogError, ConfigCatalog, EnvironmentTrack, Template};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    StorageBackend, StorageConfig,
};
pub use infra::{create_infra_services, InfraConfig, InfraError, InfraServices};
pub use orchestrator::{
    CancelOutcome, ExecutionMode, OrchestratorConfig, OrchestratorError, OrchestratorStatus,
    ProvisioningOrchestrator, RequestUpdateCallback,
};
pub use request::{
    open_request_store, JsonFileRequestStore, ProvisioningRequest, RequestFilter, RequestState,
    RequestStore, SqliteRequestStore, StepKind, StepRecord, StoreError,
};
