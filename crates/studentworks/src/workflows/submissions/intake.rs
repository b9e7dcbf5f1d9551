use std::sync::Arc;

use tracing::{error, info, warn};

use super::domain::{Submission, SubmissionDraft, SubmissionPayload};
use super::repository::{RepositoryError, SubmissionRepository, SubmissionStore};
use crate::error::{FailureKind, TaggedFailure};
use crate::workflows::attachments::{AttachmentError, AttachmentStore, Upload, UploadClass};
use crate::workflows::notifications::{NotificationEvent, NotificationSink};
use crate::workflows::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TaggedFailure for IntakeError {
    fn kind(&self) -> FailureKind {
        match self {
            IntakeError::Validation(_) => FailureKind::Validation,
            IntakeError::Attachment(err) => err.kind(),
            IntakeError::Repository(err) => err.kind(),
        }
    }
}

/// Create path for new submissions: validate, upload, store, announce.
pub struct SubmissionIntake<S> {
    repository: Arc<SubmissionRepository<S>>,
    attachments: AttachmentStore,
    notifications: Arc<dyn NotificationSink>,
}

impl<S> SubmissionIntake<S>
where
    S: SubmissionStore + 'static,
{
    pub fn new(
        repository: Arc<SubmissionRepository<S>>,
        attachments: AttachmentStore,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            attachments,
            notifications,
        }
    }

    /// Either the submission and its attachment are both stored, or neither is.
    pub async fn submit(
        &self,
        payload: SubmissionPayload,
        upload: Option<Upload>,
        submitted_by: Option<String>,
    ) -> Result<Submission, IntakeError> {
        payload.validate()?;
        if let Some(upload) = &upload {
            AttachmentStore::validate(upload, UploadClass::Applicant)?;
        }

        let mut draft = SubmissionDraft::new(payload).submitted_by(submitted_by);
        let attachment = match upload {
            Some(upload) => {
                let stored = self
                    .attachments
                    .put(
                        &draft.id().0,
                        upload,
                        UploadClass::Applicant,
                        draft.submitted_by.as_deref(),
                    )
                    .await?;
                draft = draft.with_attachment(stored.clone());
                Some(stored)
            }
            None => None,
        };

        let submission = match self.repository.create(draft).await {
            Ok(submission) => submission,
            Err(err) => {
                if let Some(orphan) = attachment {
                    match self.attachments.delete(&orphan).await {
                        Ok(()) => {
                            warn!(owner = %orphan.owner, attachment_id = %orphan.id.0, "removed attachment of failed submission")
                        }
                        Err(cleanup) if cleanup.is_not_found() => {}
                        Err(cleanup) => {
                            error!(owner = %orphan.owner, attachment_id = %orphan.id.0, error = %cleanup, "orphaned attachment left in storage")
                        }
                    }
                }
                return Err(err.into());
            }
        };

        info!(
            submission_id = %submission.id,
            kind = submission.kind().label(),
            has_attachment = submission.attachment.is_some(),
            "submission received"
        );

        let event = NotificationEvent::SubmissionReceived {
            submission_id: submission.id.clone(),
            kind: submission.kind(),
            title: submission.payload.title(),
        };
        if let Err(err) = self.notifications.enqueue(event) {
            warn!(submission_id = %submission.id, error = %err, "submission notification not queued");
        }

        Ok(submission)
    }
}
