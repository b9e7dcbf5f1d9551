use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::domain::{Application, ApplicationId, ApplicationStatus, StatusChange};
use super::repository::ApplicationStore;
use crate::workflows::attachments::AttachmentId;
use crate::workflows::store::StoreError;
use crate::workflows::submissions::SubmissionId;

#[derive(Debug, Default)]
struct ApplicationTable {
    records: HashMap<ApplicationId, Application>,
    order: Vec<ApplicationId>,
    claimed_attachments: HashSet<AttachmentId>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryApplicationStore {
    table: Arc<Mutex<ApplicationTable>>,
}

impl InMemoryApplicationStore {
    fn lock(&self) -> Result<MutexGuard<'_, ApplicationTable>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::poisoned("application store"))
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn insert(&self, application: Application) -> Result<Application, StoreError> {
        let mut table = self.lock()?;
        if table.records.contains_key(&application.id) {
            return Err(StoreError::Duplicate);
        }
        if let Some(attachment) = &application.attachment {
            if !table.claimed_attachments.insert(attachment.id.clone()) {
                return Err(StoreError::Duplicate);
            }
        }
        table.order.push(application.id.clone());
        table
            .records
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, StoreError> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    async fn list_by_posting(
        &self,
        posting_id: &SubmissionId,
    ) -> Result<Vec<Application>, StoreError> {
        let table = self.lock()?;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.records.get(id))
            .filter(|record| &record.posting_id == posting_id)
            .cloned()
            .collect())
    }

    async fn compare_and_set_status(
        &self,
        id: &ApplicationId,
        expected: ApplicationStatus,
        change: StatusChange,
    ) -> Result<Application, StoreError> {
        let mut table = self.lock()?;
        let record = table.records.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.status != expected {
            return Err(StoreError::Conflict);
        }
        change.apply(record);
        Ok(record.clone())
    }

    async fn remove(&self, id: &ApplicationId) -> Result<(), StoreError> {
        let mut table = self.lock()?;
        let removed = table.records.remove(id).ok_or(StoreError::NotFound)?;
        table.order.retain(|existing| existing != id);
        if let Some(attachment) = removed.attachment {
            table.claimed_attachments.remove(&attachment.id);
        }
        Ok(())
    }

    async fn count_by_posting(&self, posting_id: &SubmissionId) -> Result<u64, StoreError> {
        let table = self.lock()?;
        Ok(table
            .records
            .values()
            .filter(|record| &record.posting_id == posting_id)
            .count() as u64)
    }
}
