use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info, warn};

use super::domain::{
    ApplicantContact, Application, ApplicationDraft, ApplicationId, ApplicationStatus,
    StatusChange,
};
use super::repository::ApplicationStore;
use crate::error::{FailureKind, TaggedFailure};
use crate::workflows::attachments::{AttachmentError, AttachmentStore, Upload, UploadClass};
use crate::workflows::moderation::{AccessDenied, Actor, ModeratorDirectory};
use crate::workflows::notifications::{NotificationEvent, NotificationSink};
use crate::workflows::store::StoreError;
use crate::workflows::submissions::{
    ModerationStatus, RepositoryError, Submission, SubmissionId, SubmissionKind,
    SubmissionRepository, SubmissionStore,
};
use crate::workflows::validation::{self, ValidationError};

/// A status can advance at most twice, so three reads always settle a race.
const MAX_CAS_ATTEMPTS: usize = 3;
/// Recount passes before a busy posting is left for the next reconciliation.
const MAX_RECOUNT_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Forbidden(#[from] AccessDenied),
    #[error("posting {0} not found")]
    PostingNotFound(SubmissionId),
    #[error("posting {posting_id} is {status}, not approved")]
    PostingNotApproved {
        posting_id: SubmissionId,
        status: ModerationStatus,
    },
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error("application cannot move from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Posting(RepositoryError),
    #[error("application storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl TaggedFailure for ApplicationError {
    fn kind(&self) -> FailureKind {
        match self {
            ApplicationError::Validation(_) => FailureKind::Validation,
            ApplicationError::Forbidden(err) => err.kind(),
            ApplicationError::PostingNotFound(_) | ApplicationError::NotFound(_) => {
                FailureKind::NotFound
            }
            ApplicationError::PostingNotApproved { .. }
            | ApplicationError::InvalidTransition { .. } => FailureKind::InvalidTransition,
            ApplicationError::Attachment(err) => err.kind(),
            ApplicationError::Posting(err) => err.kind(),
            ApplicationError::StorageUnavailable(_) => FailureKind::StorageUnavailable,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => ApplicationError::PostingNotFound(id),
            RepositoryError::Validation(err) => ApplicationError::Validation(err),
            other => ApplicationError::Posting(other),
        }
    }
}

fn storage(id: &ApplicationId, error: StoreError) -> ApplicationError {
    match error {
        StoreError::NotFound => ApplicationError::NotFound(id.clone()),
        StoreError::Duplicate => ApplicationError::Validation(ValidationError::new(
            "attachment",
            "application or attachment already exists",
        )),
        StoreError::Conflict => {
            ApplicationError::StorageUnavailable("unexpected concurrent write".to_string())
        }
        StoreError::Unavailable(reason) => ApplicationError::StorageUnavailable(reason),
    }
}

/// Outcome of a reconciliation pass over one submission kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub corrected: usize,
    /// Postings whose counter kept moving; retried on the next pass.
    pub skipped: usize,
}

/// Per-posting gate. Submits share it across insert and increment; a recount
/// holds it exclusively so it never counts an application whose increment is
/// still outstanding.
#[derive(Default)]
struct CounterGates {
    gates: Mutex<HashMap<SubmissionId, Arc<RwLock<()>>>>,
}

impl CounterGates {
    async fn gate(&self, posting_id: &SubmissionId) -> Arc<RwLock<()>> {
        let mut gates = self.gates.lock().await;
        Arc::clone(gates.entry(posting_id.clone()).or_default())
    }

    async fn shared(&self, posting_id: &SubmissionId) -> OwnedRwLockReadGuard<()> {
        self.gate(posting_id).await.read_owned().await
    }

    async fn exclusive(&self, posting_id: &SubmissionId) -> OwnedRwLockWriteGuard<()> {
        self.gate(posting_id).await.write_owned().await
    }
}

/// Application lifecycle against approved postings, with applicant-count bookkeeping.
pub struct ApplicationEngine<S, A> {
    postings: Arc<SubmissionRepository<S>>,
    store: Arc<A>,
    attachments: AttachmentStore,
    moderators: Arc<dyn ModeratorDirectory>,
    notifications: Arc<dyn NotificationSink>,
    counters: CounterGates,
}

impl<S, A> ApplicationEngine<S, A>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    pub fn new(
        postings: Arc<SubmissionRepository<S>>,
        store: Arc<A>,
        attachments: AttachmentStore,
        moderators: Arc<dyn ModeratorDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            postings,
            store,
            attachments,
            moderators,
            notifications,
            counters: CounterGates::default(),
        }
    }

    /// Stores an application against an approved posting and bumps its applicant count.
    pub async fn submit(&self, draft: ApplicationDraft) -> Result<Application, ApplicationError> {
        draft.contact.validate()?;
        if let Some(attachment) = &draft.attachment {
            if !attachment.is_owned_by(&draft.id().0) {
                return Err(ValidationError::new(
                    "attachment",
                    "attachment belongs to another record",
                )
                .into());
            }
        }

        // Approved is terminal, so this read cannot go stale before the insert.
        let posting = self.approved_posting(&draft.posting_id).await?;

        let gate = self.counters.shared(&posting.id).await;
        let id = draft.id().clone();
        let application = self
            .store
            .insert(draft.into_application(Utc::now()))
            .await
            .map_err(|err| storage(&id, err))?;

        let applicant_number = match self.postings.increment_applicants(&posting.id).await {
            Ok(count) => count,
            Err(err) => {
                self.undo_insert(&application).await;
                return Err(err.into());
            }
        };
        drop(gate);

        info!(
            application_id = %application.id,
            posting_id = %posting.id,
            applicant_number,
            "application submitted"
        );

        let event = NotificationEvent::ApplicationReceived {
            application_id: application.id.clone(),
            posting_id: posting.id.clone(),
            posting_title: posting.payload.title(),
            poster_email: posting.payload.contact_email().to_string(),
            applicant_name: application.contact.name.clone(),
            applicant_number,
        };
        if let Err(err) = self.notifications.enqueue(event) {
            warn!(application_id = %application.id, error = %err, "application notification not queued");
        }

        Ok(application)
    }

    /// Validates, stores the upload under the new application's id, then submits.
    pub async fn submit_with_upload(
        &self,
        posting_id: SubmissionId,
        contact: ApplicantContact,
        upload: Option<Upload>,
    ) -> Result<Application, ApplicationError> {
        contact.validate()?;
        if let Some(upload) = &upload {
            AttachmentStore::validate(upload, UploadClass::Applicant)?;
        }
        self.approved_posting(&posting_id).await?;

        let mut draft = ApplicationDraft::new(posting_id, contact);
        let attachment = match upload {
            Some(upload) => {
                let stored = self
                    .attachments
                    .put(
                        &draft.id().0,
                        upload,
                        UploadClass::Applicant,
                        Some(draft.contact.email.as_str()),
                    )
                    .await?;
                draft = draft.with_attachment(stored.clone());
                Some(stored)
            }
            None => None,
        };

        match self.submit(draft).await {
            Ok(application) => Ok(application),
            Err(err) => {
                if let Some(orphan) = attachment {
                    match self.attachments.delete(&orphan).await {
                        Ok(()) => {
                            warn!(owner = %orphan.owner, attachment_id = %orphan.id.0, "removed attachment of failed application")
                        }
                        Err(cleanup) if cleanup.is_not_found() => {}
                        Err(cleanup) => {
                            error!(owner = %orphan.owner, attachment_id = %orphan.id.0, error = %cleanup, "orphaned attachment left in storage")
                        }
                    }
                }
                Err(err)
            }
        }
    }

    pub async fn get(&self, id: &ApplicationId) -> Result<Application, ApplicationError> {
        self.store
            .fetch(id)
            .await
            .map_err(|err| storage(id, err))?
            .ok_or_else(|| ApplicationError::NotFound(id.clone()))
    }

    /// Moves an application along its transition table. Terminal states reject every call.
    pub async fn transition(
        &self,
        actor: &Actor,
        id: &ApplicationId,
        status: ApplicationStatus,
        note: Option<String>,
    ) -> Result<Application, ApplicationError> {
        self.moderators.authorize(actor)?;
        let note = validation::normalized_note(note);
        if let Some(text) = &note {
            validation::limit("note", text)?;
        }

        let mut updated = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(id).await?;
            if !current.status.can_transition_to(status) {
                return Err(ApplicationError::InvalidTransition {
                    from: current.status,
                    to: status,
                });
            }

            let change = StatusChange {
                status,
                note: note.clone(),
                reviewed_by: actor.email.clone(),
                at: Utc::now(),
            };
            match self
                .store
                .compare_and_set_status(id, current.status, change)
                .await
            {
                Ok(application) => {
                    updated = Some(application);
                    break;
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(storage(id, err)),
            }
        }
        let application = updated.ok_or_else(|| {
            ApplicationError::StorageUnavailable(format!("application {id} kept changing"))
        })?;

        info!(
            application_id = %application.id,
            posting_id = %application.posting_id,
            status = application.status.label(),
            reviewer = %actor.email,
            "application transitioned"
        );

        let posting = match self.postings.get(&application.posting_id).await {
            Ok(posting) => Some(posting),
            Err(err) => {
                warn!(application_id = %application.id, error = %err, "posting lookup failed; notifying applicant only");
                None
            }
        };
        let event = NotificationEvent::ApplicationStatusChanged {
            application_id: application.id.clone(),
            posting_id: application.posting_id.clone(),
            posting_title: posting.as_ref().map(|p| p.payload.title()),
            applicant: application.contact.clone(),
            status: application.status,
            note: application.status_note.clone(),
            poster_email: posting
                .as_ref()
                .filter(|_| application.status.is_terminal())
                .map(|p| p.payload.contact_email().to_string()),
        };
        if let Err(err) = self.notifications.enqueue(event) {
            warn!(application_id = %application.id, error = %err, "status notification not queued");
        }

        Ok(application)
    }

    /// Oldest first, so position `n` is "applicant #n+1".
    pub async fn list_by_posting(
        &self,
        actor: &Actor,
        posting_id: &SubmissionId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>, ApplicationError> {
        self.moderators.authorize(actor)?;
        let posting = self.postings.get(posting_id).await?;
        ensure_posting(&posting)?;

        let mut applications = self
            .store
            .list_by_posting(posting_id)
            .await
            .map_err(|err| ApplicationError::StorageUnavailable(err.to_string()))?;
        applications.retain(|application| status.map_or(true, |wanted| application.status == wanted));
        applications.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(applications)
    }

    /// Replaces the posting's applicant count with a direct count of its applications.
    pub async fn recount(&self, posting_id: &SubmissionId) -> Result<u64, ApplicationError> {
        let posting = self.postings.get(posting_id).await?;
        ensure_posting(&posting)?;
        match self.recount_posting(&posting.id).await? {
            Some((count, _)) => Ok(count),
            None => Err(ApplicationError::StorageUnavailable(format!(
                "applicant count for {} kept changing during recount",
                posting.id
            ))),
        }
    }

    /// Recounts every posting of `kind`.
    pub async fn reconcile_all(
        &self,
        kind: SubmissionKind,
    ) -> Result<ReconcileSummary, ApplicationError> {
        if !kind.is_posting() {
            return Err(ValidationError::new("kind", "only postings carry applicant counts").into());
        }

        let postings: Vec<Submission> = self.postings.list_by_kind(kind, None).try_collect().await?;
        let mut summary = ReconcileSummary::default();
        for posting in &postings {
            summary.scanned += 1;
            match self.recount_posting(&posting.id).await? {
                Some((_, true)) => summary.corrected += 1,
                Some((_, false)) => {}
                None => {
                    warn!(posting_id = %posting.id, "applicant count still moving; left for the next pass");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            kind = kind.label(),
            scanned = summary.scanned,
            corrected = summary.corrected,
            skipped = summary.skipped,
            "applicant counts reconciled"
        );
        Ok(summary)
    }

    /// `None` when the stored counter changed under every attempt.
    async fn recount_posting(
        &self,
        posting_id: &SubmissionId,
    ) -> Result<Option<(u64, bool)>, ApplicationError> {
        let _gate = self.counters.exclusive(posting_id).await;

        for attempt in 1..=MAX_RECOUNT_ATTEMPTS {
            let stored = self.postings.get(posting_id).await?.applicant_count;
            let count = self
                .store
                .count_by_posting(posting_id)
                .await
                .map_err(|err| ApplicationError::StorageUnavailable(err.to_string()))?;

            if count == stored {
                return Ok(Some((count, false)));
            }
            if self
                .postings
                .compare_and_set_applicants(posting_id, stored, count)
                .await?
            {
                warn!(
                    posting_id = %posting_id,
                    stored,
                    counted = count,
                    "applicant count drift corrected"
                );
                return Ok(Some((count, true)));
            }
            debug!(posting_id = %posting_id, attempt, "applicant count moved during recount; retrying");
        }
        Ok(None)
    }

    async fn approved_posting(&self, posting_id: &SubmissionId) -> Result<Submission, ApplicationError> {
        let posting = self.postings.get(posting_id).await?;
        ensure_posting(&posting)?;
        if posting.status != ModerationStatus::Approved {
            return Err(ApplicationError::PostingNotApproved {
                posting_id: posting.id,
                status: posting.status,
            });
        }
        Ok(posting)
    }

    async fn undo_insert(&self, application: &Application) {
        match self.store.remove(&application.id).await {
            Ok(()) => warn!(
                application_id = %application.id,
                posting_id = %application.posting_id,
                "application removed after counter update failed"
            ),
            Err(err) => error!(
                application_id = %application.id,
                posting_id = %application.posting_id,
                error = %err,
                "application kept without counter update; recount required"
            ),
        }
    }
}

fn ensure_posting(submission: &Submission) -> Result<(), ValidationError> {
    if submission.is_posting() {
        Ok(())
    } else {
        Err(ValidationError::new(
            "posting_id",
            format!("{} does not accept applications", submission.kind().label()),
        ))
    }
}
