use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};

use super::domain::{
    ModerationStatus, StatusUpdate, Submission, SubmissionDraft, SubmissionId, SubmissionKind,
};
use crate::error::{FailureKind, TaggedFailure};
use crate::workflows::attachments::AttachmentRef;
use crate::workflows::store::StoreError;
use crate::workflows::validation::ValidationError;

/// Keyed document store seam for submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Fails with `Duplicate` if the id or its attachment is already stored.
    async fn insert(&self, submission: Submission) -> Result<Submission, StoreError>;
    async fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError>;
    /// Matching records in insertion order.
    async fn scan(
        &self,
        kind: SubmissionKind,
        status: Option<ModerationStatus>,
    ) -> Result<Vec<Submission>, StoreError>;
    /// Applies `update` only while the stored status equals `expected`, else `Conflict`.
    async fn compare_and_set_status(
        &self,
        id: &SubmissionId,
        expected: ModerationStatus,
        update: StatusUpdate,
    ) -> Result<Submission, StoreError>;
    /// Appends a moderator file; `Duplicate` if the attachment is already claimed.
    async fn append_file(
        &self,
        id: &SubmissionId,
        file: AttachmentRef,
    ) -> Result<Submission, StoreError>;
    /// Atomic counter add; returns the new value.
    async fn increment_applicants(&self, id: &SubmissionId, delta: u64) -> Result<u64, StoreError>;
    /// Overwrites the counter only while it still equals `expected`, else `Conflict`.
    async fn compare_and_set_applicants(
        &self,
        id: &SubmissionId,
        expected: u64,
        count: u64,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("submission {0} not found")]
    NotFound(SubmissionId),
    #[error("submission cannot move from {from} to {to}")]
    InvalidTransition {
        from: ModerationStatus,
        to: ModerationStatus,
    },
    #[error("submission storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl TaggedFailure for RepositoryError {
    fn kind(&self) -> FailureKind {
        match self {
            RepositoryError::Validation(_) => FailureKind::Validation,
            RepositoryError::NotFound(_) => FailureKind::NotFound,
            RepositoryError::InvalidTransition { .. } => FailureKind::InvalidTransition,
            RepositoryError::StorageUnavailable(_) => FailureKind::StorageUnavailable,
        }
    }
}

fn storage(id: &SubmissionId, error: StoreError) -> RepositoryError {
    match error {
        StoreError::NotFound => RepositoryError::NotFound(id.clone()),
        StoreError::Duplicate => RepositoryError::Validation(ValidationError::new(
            "attachment",
            "submission or attachment already exists",
        )),
        StoreError::Conflict => {
            RepositoryError::StorageUnavailable("unexpected concurrent write".to_string())
        }
        StoreError::Unavailable(reason) => RepositoryError::StorageUnavailable(reason),
    }
}

/// CRUD and status transitions over all four submission kinds.
pub struct SubmissionRepository<S> {
    store: Arc<S>,
}

impl<S> SubmissionRepository<S>
where
    S: SubmissionStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Stores a draft as `Pending`, stamping `created_at`.
    pub async fn create(&self, draft: SubmissionDraft) -> Result<Submission, RepositoryError> {
        draft.payload.validate()?;

        if let Some(attachment) = &draft.attachment {
            if !attachment.is_owned_by(&draft.id().0) {
                return Err(ValidationError::new(
                    "attachment",
                    "attachment belongs to another record",
                )
                .into());
            }
        }

        let id = draft.id().clone();
        let submission = Submission {
            id: id.clone(),
            payload: draft.payload,
            attachment: draft.attachment,
            status: ModerationStatus::Pending,
            created_at: Utc::now(),
            moderated_at: None,
            moderated_by: None,
            moderator_note: None,
            submitted_by: draft.submitted_by,
            applicant_count: 0,
            files: Vec::new(),
        };

        self.store
            .insert(submission)
            .await
            .map_err(|err| storage(&id, err))
    }

    pub async fn get(&self, id: &SubmissionId) -> Result<Submission, RepositoryError> {
        self.store
            .fetch(id)
            .await
            .map_err(|err| storage(id, err))?
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    /// Newest first. The query runs when the stream is first polled, so every call re-queries.
    pub fn list_by_kind(
        &self,
        kind: SubmissionKind,
        status: Option<ModerationStatus>,
    ) -> BoxStream<'static, Result<Submission, RepositoryError>> {
        let store = Arc::clone(&self.store);

        stream::once(async move { store.scan(kind, status).await })
            .map(|scanned| match scanned {
                Ok(mut records) => {
                    records.reverse();
                    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    stream::iter(records.into_iter().map(Ok::<_, RepositoryError>)).left_stream()
                }
                Err(err) => stream::iter(std::iter::once(Err(
                    RepositoryError::StorageUnavailable(err.to_string()),
                )))
                .right_stream(),
            })
            .flatten()
            .boxed()
    }

    /// Single-writer transition out of `Pending`. A caller that loses the race sees `InvalidTransition`.
    pub async fn update_status(
        &self,
        id: &SubmissionId,
        status: ModerationStatus,
        note: Option<String>,
        moderated_by: Option<String>,
    ) -> Result<Submission, RepositoryError> {
        if !ModerationStatus::Pending.can_transition_to(status) {
            let current = self.get(id).await?;
            return Err(RepositoryError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let update = StatusUpdate {
            status,
            note,
            moderated_by,
            at: Utc::now(),
        };

        match self
            .store
            .compare_and_set_status(id, ModerationStatus::Pending, update)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(StoreError::Conflict) => {
                let current = self.get(id).await?;
                Err(RepositoryError::InvalidTransition {
                    from: current.status,
                    to: status,
                })
            }
            Err(err) => Err(storage(id, err)),
        }
    }

    /// Records an administrative upload against an existing submission of any status.
    pub async fn attach_file(
        &self,
        id: &SubmissionId,
        file: AttachmentRef,
    ) -> Result<Submission, RepositoryError> {
        if !file.is_owned_by(&id.0) {
            return Err(ValidationError::new("file", "file belongs to another record").into());
        }
        self.store
            .append_file(id, file)
            .await
            .map_err(|err| storage(id, err))
    }

    pub async fn increment_applicants(&self, id: &SubmissionId) -> Result<u64, RepositoryError> {
        self.store
            .increment_applicants(id, 1)
            .await
            .map_err(|err| storage(id, err))
    }

    /// Returns `false` when the counter moved away from `expected` first.
    pub async fn compare_and_set_applicants(
        &self,
        id: &SubmissionId,
        expected: u64,
        count: u64,
    ) -> Result<bool, RepositoryError> {
        match self
            .store
            .compare_and_set_applicants(id, expected, count)
            .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict) => Ok(false),
            Err(err) => Err(storage(id, err)),
        }
    }
}
