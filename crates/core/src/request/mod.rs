//! Provisioning requests and their durable log.

mod file_store;
mod id;
mod sqlite_store;
mod store;
mod types;

pub use file_store::JsonFileRequestStore;
pub use id::{generate_id, is_valid_id, MAX_ID_LEN};
pub use sqlite_store::SqliteRequestStore;
pub use store::{NewRequest, RequestFilter, RequestStore, StoreError};
pub use types::{ProvisioningRequest, RequestState, StepKind, StepOutcome, StepRecord};

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Open the request store selected by the storage configuration.
pub fn open_request_store(config: &StorageConfig) -> Result<Arc<dyn RequestStore>, StoreError> {
    match config.backend {
        StorageBackend::Sqlite => {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
            Ok(Arc::new(SqliteRequestStore::new(&config.path)?))
        }
        StorageBackend::JsonFiles => Ok(Arc::new(JsonFileRequestStore::new(&config.log_dir)?)),
    }
}
