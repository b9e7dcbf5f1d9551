use async_trait::async_trait;

use super::domain::{Application, ApplicationId, ApplicationStatus, StatusChange};
use crate::workflows::store::StoreError;
use crate::workflows::submissions::SubmissionId;

/// Keyed document store seam for applications.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Fails with `Duplicate` if the id or its attachment is already stored.
    async fn insert(&self, application: Application) -> Result<Application, StoreError>;
    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, StoreError>;
    /// Applications for one posting in insertion order.
    async fn list_by_posting(
        &self,
        posting_id: &SubmissionId,
    ) -> Result<Vec<Application>, StoreError>;
    /// Applies `change` only while the stored status equals `expected`, else `Conflict`.
    async fn compare_and_set_status(
        &self,
        id: &ApplicationId,
        expected: ApplicationStatus,
        change: StatusChange,
    ) -> Result<Application, StoreError>;
    /// Used only to undo an insert whose counter update failed.
    async fn remove(&self, id: &ApplicationId) -> Result<(), StoreError>;
    async fn count_by_posting(&self, posting_id: &SubmissionId) -> Result<u64, StoreError>;
}
