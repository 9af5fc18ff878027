use std::sync::Arc;
use uuid::Uuid;

use super::error::IpcrResult;
use super::store::FormStore;

/// Friendly pre-check for "one form per employee per cycle".
///
/// This is a read, not a lock: two concurrent creations can both see
/// `None`. The unique (employee_id, cycle_id) constraint in the store is
/// what actually rejects the second insert.
#[derive(Clone)]
pub struct DuplicateGuard {
    store: Arc<dyn FormStore>,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn FormStore>) -> Self {
        Self { store }
    }

    pub async fn exists(&self, employee_id: Uuid, cycle_id: Uuid) -> IpcrResult<Option<Uuid>> {
        Ok(self
            .store
            .find_form_for(employee_id, cycle_id)
            .await?
            .map(|form| form.id))
    }
}
