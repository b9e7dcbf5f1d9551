use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::domain::{ModerationStatus, StatusUpdate, Submission, SubmissionId, SubmissionKind};
use super::repository::SubmissionStore;
use crate::workflows::attachments::{AttachmentId, AttachmentRef};
use crate::workflows::store::StoreError;

#[derive(Debug, Default)]
struct SubmissionTable {
    records: HashMap<SubmissionId, Submission>,
    order: Vec<SubmissionId>,
    claimed_attachments: HashSet<AttachmentId>,
}

/// Mutex-guarded document store; each method is one atomic step.
#[derive(Debug, Default, Clone)]
pub struct InMemorySubmissionStore {
    table: Arc<Mutex<SubmissionTable>>,
}

impl InMemorySubmissionStore {
    fn lock(&self) -> Result<MutexGuard<'_, SubmissionTable>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::poisoned("submission store"))
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn insert(&self, submission: Submission) -> Result<Submission, StoreError> {
        let mut table = self.lock()?;
        if table.records.contains_key(&submission.id) {
            return Err(StoreError::Duplicate);
        }
        if let Some(attachment) = &submission.attachment {
            if !table.claimed_attachments.insert(attachment.id.clone()) {
                return Err(StoreError::Duplicate);
            }
        }
        table.order.push(submission.id.clone());
        table
            .records
            .insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    async fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        let table = self.lock()?;
        Ok(table.records.get(id).cloned())
    }

    async fn scan(
        &self,
        kind: SubmissionKind,
        status: Option<ModerationStatus>,
    ) -> Result<Vec<Submission>, StoreError> {
        let table = self.lock()?;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.records.get(id))
            .filter(|record| record.kind() == kind)
            .filter(|record| status.map_or(true, |wanted| record.status == wanted))
            .cloned()
            .collect())
    }

    async fn compare_and_set_status(
        &self,
        id: &SubmissionId,
        expected: ModerationStatus,
        update: StatusUpdate,
    ) -> Result<Submission, StoreError> {
        let mut table = self.lock()?;
        let record = table.records.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.status != expected {
            return Err(StoreError::Conflict);
        }
        update.apply(record);
        Ok(record.clone())
    }

    async fn append_file(
        &self,
        id: &SubmissionId,
        file: AttachmentRef,
    ) -> Result<Submission, StoreError> {
        let mut table = self.lock()?;
        if !table.records.contains_key(id) {
            return Err(StoreError::NotFound);
        }
        if !table.claimed_attachments.insert(file.id.clone()) {
            return Err(StoreError::Duplicate);
        }
        let record = table.records.get_mut(id).ok_or(StoreError::NotFound)?;
        record.files.push(file);
        Ok(record.clone())
    }

    async fn increment_applicants(&self, id: &SubmissionId, delta: u64) -> Result<u64, StoreError> {
        let mut table = self.lock()?;
        let record = table.records.get_mut(id).ok_or(StoreError::NotFound)?;
        record.applicant_count = record.applicant_count.saturating_add(delta);
        Ok(record.applicant_count)
    }

    async fn compare_and_set_applicants(
        &self,
        id: &SubmissionId,
        expected: u64,
        count: u64,
    ) -> Result<(), StoreError> {
        let mut table = self.lock()?;
        let record = table.records.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.applicant_count != expected {
            return Err(StoreError::Conflict);
        }
        record.applicant_count = count;
        Ok(())
    }
}
