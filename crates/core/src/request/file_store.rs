//! JSON-file request store.
//!
//! One `{id}.json` document per request in a single directory. Documents are
//! written to a temporary sibling first and then moved into place, so a reader
//! never observes a half-written record.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::warn;

use super::{
    NewRequest, ProvisioningRequest, RequestFilter, RequestState, RequestStore, StepRecord,
    StoreError,
};

const EXTENSION: &str = "json";

/// Request store backed by a directory of JSON documents.
pub struct JsonFileRequestStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

impl JsonFileRequestStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the request documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Io("store lock poisoned".to_string()))
    }

    /// Path of the document for `id`, or `None` when the id cannot name a file.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.starts_with('.') || id.contains(|c: char| c == '/' || c == '\\') {
            return None;
        }
        Some(self.dir.join(format!("{}.{}", id, EXTENSION)))
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()))
    }

    fn write_temp(&self, request: &ProvisioningRequest) -> Result<PathBuf, StoreError> {
        let bytes = serde_json::to_vec_pretty(request)?;
        let tmp = self.temp_path(&request.id);
        fs::write(&tmp, bytes).map_err(io_err)?;
        Ok(tmp)
    }

    /// Replace an existing document atomically.
    fn persist(&self, request: &ProvisioningRequest) -> Result<(), StoreError> {
        let target = self
            .path_for(&request.id)
            .ok_or_else(|| StoreError::NotFound(request.id.clone()))?;
        let tmp = self.write_temp(request)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Option<ProvisioningRequest>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    fn load(&self, id: &str) -> Result<ProvisioningRequest, StoreError> {
        self.get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn read_all(&self) -> Result<Vec<ProvisioningRequest>, StoreError> {
        let mut requests = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_document = path.extension().map_or(false, |ext| ext == EXTENSION)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(true, |n| n.starts_with('.'));
            if !is_document {
                continue;
            }
            match Self::read(&path) {
                Ok(Some(request)) => requests.push(request),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable request file {}: {}", path.display(), e),
            }
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }
}

impl RequestStore for JsonFileRequestStore {
    fn create(&self, request: NewRequest) -> Result<ProvisioningRequest, StoreError> {
        let _guard = self.lock()?;
        let record = ProvisioningRequest::new(request.id, request.track, request.template);
        let target = self
            .path_for(&record.id)
            .ok_or_else(|| StoreError::Io(format!("identifier '{}' is not a file name", record.id)))?;

        // hard_link refuses to overwrite, which makes the create exclusive
        // even against another process sharing the directory.
        let tmp = self.write_temp(&record)?;
        let linked = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(record),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::Duplicate(record.id)),
            Err(e) => Err(io_err(e)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        match self.path_for(id) {
            Some(path) => Self::read(&path),
            None => Ok(None),
        }
    }

    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(id).map_or(false, |p| p.exists()))
    }

    fn list(&self, filter: &RequestFilter) -> Result<Vec<ProvisioningRequest>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    fn count(&self, filter: &RequestFilter) -> Result<i64, StoreError> {
        Ok(self.read_all()?.iter().filter(|r| filter.matches(r)).count() as i64)
    }

    fn update_state(
        &self,
        id: &str,
        new_state: RequestState,
        reason: Option<String>,
    ) -> Result<ProvisioningRequest, StoreError> {
        let _guard = self.lock()?;
        let mut request = self.load(id)?;
        request
            .apply_transition(new_state, reason)
            .map_err(|(from, to)| StoreError::InvalidTransition {
                request_id: id.to_string(),
                from,
                to,
            })?;
        self.persist(&request)?;
        Ok(request)
    }

    fn append_step(&self, id: &str, record: StepRecord) -> Result<ProvisioningRequest, StoreError> {
        let _guard = self.lock()?;
        let mut request = self.load(id)?;
        if request.state.is_terminal() {
            return Err(StoreError::Terminal(id.to_string()));
        }
        request.steps.push(record);
        request.updated_at = Utc::now();
        self.persist(&request)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConfigCatalog, EnvironmentTrack};
    use crate::request::StepKind;
    use tempfile::TempDir;

    fn new_request(id: &str, track: EnvironmentTrack) -> NewRequest {
        NewRequest {
            id: id.to_string(),
            track,
            template: ConfigCatalog::builtin().get(track).clone(),
        }
    }

    #[test]
    fn test_create_writes_one_document() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileRequestStore::new(temp.path()).unwrap();

        store.create(new_request("demo-1", EnvironmentTrack::Demo)).unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["demo-1.json"]);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileRequestStore::new(temp.path()).unwrap();

        store.create(new_request("dup", EnvironmentTrack::Demo)).unwrap();
        let err = store
            .create(new_request("dup", EnvironmentTrack::Platform))
            .unwrap_err();

        assert_eq!(err, StoreError::Duplicate("dup".to_string()));
        assert_eq!(
            store.get("dup").unwrap().unwrap().track,
            EnvironmentTrack::Demo
        );
    }

    #[test]
    fn test_path_like_identifiers_are_not_found() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileRequestStore::new(temp.path()).unwrap();

        assert!(store.get("../etc/passwd").unwrap().is_none());
        assert!(!store.exists(".hidden").unwrap());
    }

    #[test]
    fn test_state_and_steps_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = JsonFileRequestStore::new(temp.path()).unwrap();
            store.create(new_request("cust", EnvironmentTrack::Customer)).unwrap();
            store
                .update_state("cust", RequestState::ProvisioningResources, None)
                .unwrap();
            store
                .append_step(
                    "cust",
                    StepRecord::success(
                        StepKind::ProvisionResources,
                        1,
                        vec!["res-1".to_string()],
                        Utc::now(),
                    ),
                )
                .unwrap();
        }

        let store = JsonFileRequestStore::new(temp.path()).unwrap();
        let request = store.get("cust").unwrap().unwrap();
        assert_eq!(request.state, RequestState::ProvisioningResources);
        assert_eq!(request.steps.len(), 1);
        assert!(request.step_succeeded(StepKind::ProvisionResources));
    }

    #[test]
    fn test_backwards_transition_rejected() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileRequestStore::new(temp.path()).unwrap();
        store.create(new_request("env", EnvironmentTrack::Demo)).unwrap();
        store.update_state("env", RequestState::Cancelled, None).unwrap();

        let err = store
            .update_state("env", RequestState::ProvisioningResources, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let err = store
            .append_step(
                "env",
                StepRecord::success(StepKind::ProvisionResources, 1, vec![], Utc::now()),
            )
            .unwrap_err();
        assert_eq!(err, StoreError::Terminal("env".to_string()));
    }

    #[test]
    fn test_list_filters_and_ignores_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileRequestStore::new(temp.path()).unwrap();
        store.create(new_request("a", EnvironmentTrack::Demo)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.create(new_request("b", EnvironmentTrack::Customer)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.create(new_request("c", EnvironmentTrack::Demo)).unwrap();
        fs::write(temp.path().join(".c.deadbeef.tmp"), b"{").unwrap();

        let all = store.list(&RequestFilter::new()).unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let demo = RequestFilter::new().with_track(EnvironmentTrack::Demo);
        assert_eq!(store.count(&demo).unwrap(), 2);
        assert_eq!(store.list(&demo.with_offset(1)).unwrap()[0].id, "a");
    }

    #[test]
    fn test_update_missing_request() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileRequestStore::new(temp.path()).unwrap();

        let err = store
            .update_state("ghost", RequestState::Cancelled, None)
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("ghost".to_string()));
    }
}
