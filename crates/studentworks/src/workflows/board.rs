use std::sync::Arc;

use tracing::{info, warn};

use super::applications::{
    Application, ApplicationEngine, ApplicationError, ApplicationId, ApplicationStore,
};
use super::attachments::{
    AttachmentContent, AttachmentError, AttachmentStore, BlobStore, Upload, UploadClass,
};
use super::moderation::{
    AccessDenied, Actor, ModerationEngine, ModerationError, ModeratorDirectory,
};
use super::notifications::NotificationSink;
use super::submissions::{
    RepositoryError, Submission, SubmissionId, SubmissionIntake, SubmissionRepository,
    SubmissionStore,
};
use crate::error::{FailureKind, TaggedFailure};

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Forbidden(#[from] AccessDenied),
}

impl TaggedFailure for BoardError {
    fn kind(&self) -> FailureKind {
        match self {
            BoardError::Repository(err) => err.kind(),
            BoardError::Application(err) => err.kind(),
            BoardError::Attachment(err) => err.kind(),
            BoardError::Forbidden(err) => err.kind(),
        }
    }
}

impl From<ModerationError> for BoardError {
    fn from(value: ModerationError) -> Self {
        match value {
            ModerationError::Forbidden(err) => BoardError::Forbidden(err),
            ModerationError::Repository(err) => BoardError::Repository(err),
        }
    }
}

/// Wires intake, moderation, and applications over one set of collaborators.
pub struct Board<S, A> {
    submissions: Arc<SubmissionRepository<S>>,
    intake: SubmissionIntake<S>,
    moderation: ModerationEngine<S>,
    applications: ApplicationEngine<S, A>,
    attachments: AttachmentStore,
    moderators: Arc<dyn ModeratorDirectory>,
}

impl<S, A> Board<S, A>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    pub fn new(
        submission_store: Arc<S>,
        application_store: Arc<A>,
        blobs: Arc<dyn BlobStore>,
        moderators: Arc<dyn ModeratorDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let submissions = Arc::new(SubmissionRepository::new(submission_store));
        let attachments = AttachmentStore::new(blobs);

        let intake = SubmissionIntake::new(
            Arc::clone(&submissions),
            attachments.clone(),
            Arc::clone(&notifications),
        );
        let moderation = ModerationEngine::new(
            Arc::clone(&submissions),
            Arc::clone(&moderators),
            Arc::clone(&notifications),
        );
        let applications = ApplicationEngine::new(
            Arc::clone(&submissions),
            application_store,
            attachments.clone(),
            Arc::clone(&moderators),
            notifications,
        );

        Self {
            submissions,
            intake,
            moderation,
            applications,
            attachments,
            moderators,
        }
    }

    pub fn submissions(&self) -> &SubmissionRepository<S> {
        &self.submissions
    }

    pub fn intake(&self) -> &SubmissionIntake<S> {
        &self.intake
    }

    pub fn moderation(&self) -> &ModerationEngine<S> {
        &self.moderation
    }

    pub fn applications(&self) -> &ApplicationEngine<S, A> {
        &self.applications
    }

    pub fn moderators(&self) -> &dyn ModeratorDirectory {
        self.moderators.as_ref()
    }

    /// Unapproved submissions are hidden from everyone but moderators and their submitter.
    pub async fn submission_for(
        &self,
        actor: Option<&Actor>,
        id: &SubmissionId,
    ) -> Result<Submission, BoardError> {
        let submission = self.submissions.get(id).await?;
        if submission.is_visible()
            || self.is_owner_or_moderator(actor, submission.submitted_by.as_deref())
        {
            Ok(submission)
        } else {
            Err(RepositoryError::NotFound(id.clone()).into())
        }
    }

    pub async fn submission_attachment(
        &self,
        actor: Option<&Actor>,
        id: &SubmissionId,
    ) -> Result<AttachmentContent, BoardError> {
        let submission = self.submission_for(actor, id).await?;
        let reference = submission.attachment.ok_or(AttachmentError::NotFound)?;
        Ok(self.attachments.get(&reference).await?)
    }

    /// Moderator upload filed against a submission in any status, e.g. a signed work permit.
    pub async fn attach_file(
        &self,
        actor: &Actor,
        id: &SubmissionId,
        upload: Upload,
    ) -> Result<Submission, BoardError> {
        self.moderators.authorize(actor)?;
        let submission = self.submissions.get(id).await?;

        let file = self
            .attachments
            .put(
                &submission.id.0,
                upload,
                UploadClass::Administrative,
                Some(actor.email.as_str()),
            )
            .await?;
        let file_id = file.id.clone();

        match self.submissions.attach_file(id, file.clone()).await {
            Ok(updated) => {
                info!(
                    submission_id = %id,
                    file_id = %file_id.0,
                    moderator = %actor.email,
                    "administrative file attached"
                );
                Ok(updated)
            }
            Err(err) => {
                if let Err(cleanup) = self.attachments.delete(&file).await {
                    warn!(submission_id = %id, error = %cleanup, "orphaned administrative file");
                }
                Err(err.into())
            }
        }
    }

    /// Administrative files follow the visibility of the submission they are filed against.
    pub async fn submission_file(
        &self,
        actor: Option<&Actor>,
        id: &SubmissionId,
        file_id: &str,
    ) -> Result<AttachmentContent, BoardError> {
        let submission = self.submission_for(actor, id).await?;
        let reference = submission
            .files
            .into_iter()
            .find(|file| file.id.0 == file_id)
            .ok_or(AttachmentError::NotFound)?;
        Ok(self.attachments.get(&reference).await?)
    }

    /// Readable by moderators and by the applicant who sent it.
    pub async fn application_for(
        &self,
        actor: &Actor,
        id: &ApplicationId,
    ) -> Result<Application, BoardError> {
        let application = self.applications.get(id).await?;
        if self.is_owner_or_moderator(Some(actor), Some(&application.contact.email)) {
            Ok(application)
        } else {
            Err(AccessDenied {
                email: actor.email.clone(),
            }
            .into())
        }
    }

    pub async fn application_attachment(
        &self,
        actor: &Actor,
        id: &ApplicationId,
    ) -> Result<AttachmentContent, BoardError> {
        let application = self.application_for(actor, id).await?;
        let reference = application.attachment.ok_or(AttachmentError::NotFound)?;
        Ok(self.attachments.get(&reference).await?)
    }

    fn is_owner_or_moderator(&self, actor: Option<&Actor>, owner: Option<&str>) -> bool {
        let Some(actor) = actor else {
            return false;
        };
        self.moderators.is_moderator(&actor.email)
            || owner.is_some_and(|owner| owner.trim().eq_ignore_ascii_case(actor.email.trim()))
    }
}
