//! Request store wrapper that injects persistence failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::request::{
    NewRequest, ProvisioningRequest, RequestFilter, RequestState, RequestStore, StepRecord,
    StoreError,
};

/// Delegates to an inner store, failing selected operations on demand.
///
/// ```rust,ignore
/// let store = Arc::new(FailingRequestStore::new(Arc::new(SqliteRequestStore::in_memory()?)));
/// store.set_fail_append_step(true);
/// ```
pub struct FailingRequestStore {
    inner: Arc<dyn RequestStore>,
    fail_create: AtomicBool,
    fail_update_state: AtomicBool,
    fail_terminal_transition: AtomicBool,
    fail_append_step: AtomicBool,
    fail_count: AtomicBool,
    injected: AtomicUsize,
}

impl FailingRequestStore {
    pub fn new(inner: Arc<dyn RequestStore>) -> Self {
        Self {
            inner,
            fail_create: AtomicBool::new(false),
            fail_update_state: AtomicBool::new(false),
            fail_terminal_transition: AtomicBool::new(false),
            fail_append_step: AtomicBool::new(false),
            fail_count: AtomicBool::new(false),
            injected: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update_state(&self, fail: bool) {
        self.fail_update_state.store(fail, Ordering::SeqCst);
    }

    /// Fail only transitions into a terminal state.
    pub fn set_fail_terminal_transition(&self, fail: bool) {
        self.fail_terminal_transition.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_append_step(&self, fail: bool) {
        self.fail_append_step.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_count(&self, fail: bool) {
        self.fail_count.store(fail, Ordering::SeqCst);
    }

    /// Number of operations that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Database(format!("injected {} failure", operation)));
        }
        Ok(())
    }
}

impl RequestStore for FailingRequestStore {
    fn create(&self, request: NewRequest) -> Result<ProvisioningRequest, StoreError> {
        self.check(&self.fail_create, "create")?;
        self.inner.create(request)
    }

    fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        self.inner.get(id)
    }

    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.exists(id)
    }

    fn list(&self, filter: &RequestFilter) -> Result<Vec<ProvisioningRequest>, StoreError> {
        self.inner.list(filter)
    }

    fn count(&self, filter: &RequestFilter) -> Result<i64, StoreError> {
        self.check(&self.fail_count, "count")?;
        self.inner.count(filter)
    }

    fn update_state(
        &self,
        id: &str,
        new_state: RequestState,
        reason: Option<String>,
    ) -> Result<ProvisioningRequest, StoreError> {
        self.check(&self.fail_update_state, "update_state")?;
        if new_state.is_terminal() {
            self.check(&self.fail_terminal_transition, "terminal update_state")?;
        }
        self.inner.update_state(id, new_state, reason)
    }

    fn append_step(&self, id: &str, record: StepRecord) -> Result<ProvisioningRequest, StoreError> {
        self.check(&self.fail_append_step, "append_step")?;
        self.inner.append_step(id, record)
    }
}
