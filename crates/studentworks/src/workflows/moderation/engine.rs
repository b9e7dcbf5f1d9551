use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{info, warn};

use super::identity::{AccessDenied, Actor, ModeratorDirectory};
use crate::error::{FailureKind, TaggedFailure};
use crate::workflows::notifications::{NotificationEvent, NotificationSink};
use crate::workflows::submissions::{
    ModerationStatus, RepositoryError, Submission, SubmissionId, SubmissionKind,
    SubmissionRepository, SubmissionStore,
};
use crate::workflows::validation;

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error(transparent)]
    Forbidden(#[from] AccessDenied),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TaggedFailure for ModerationError {
    fn kind(&self) -> FailureKind {
        match self {
            ModerationError::Forbidden(err) => err.kind(),
            ModerationError::Repository(err) => err.kind(),
        }
    }
}

/// Pending -> Approved | Rejected, once, by a moderator.
pub struct ModerationEngine<S> {
    repository: Arc<SubmissionRepository<S>>,
    moderators: Arc<dyn ModeratorDirectory>,
    notifications: Arc<dyn NotificationSink>,
}

impl<S> ModerationEngine<S>
where
    S: SubmissionStore + 'static,
{
    pub fn new(
        repository: Arc<SubmissionRepository<S>>,
        moderators: Arc<dyn ModeratorDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            moderators,
            notifications,
        }
    }

    pub async fn approve(
        &self,
        actor: &Actor,
        id: &SubmissionId,
    ) -> Result<Submission, ModerationError> {
        self.decide(actor, id, ModerationStatus::Approved, None).await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        id: &SubmissionId,
        note: Option<String>,
    ) -> Result<Submission, ModerationError> {
        let note = validation::normalized_note(note);
        if let Some(text) = &note {
            validation::limit("note", text).map_err(RepositoryError::from)?;
        }
        self.decide(actor, id, ModerationStatus::Rejected, note).await
    }

    /// Public listing: approved submissions of `kind`, newest first.
    pub fn list_visible(
        &self,
        kind: SubmissionKind,
    ) -> BoxStream<'static, Result<Submission, RepositoryError>> {
        self.repository
            .list_by_kind(kind, Some(ModerationStatus::Approved))
    }

    /// Moderation queue view; any status unless filtered.
    pub fn list_by_kind(
        &self,
        actor: &Actor,
        kind: SubmissionKind,
        status: Option<ModerationStatus>,
    ) -> Result<BoxStream<'static, Result<Submission, RepositoryError>>, ModerationError> {
        self.moderators.authorize(actor)?;
        Ok(self.repository.list_by_kind(kind, status))
    }

    async fn decide(
        &self,
        actor: &Actor,
        id: &SubmissionId,
        status: ModerationStatus,
        note: Option<String>,
    ) -> Result<Submission, ModerationError> {
        self.moderators.authorize(actor)?;

        let submission = self
            .repository
            .update_status(id, status, note, Some(actor.email.clone()))
            .await?;

        info!(
            submission_id = %submission.id,
            kind = submission.kind().label(),
            status = submission.status.label(),
            moderator = %actor.email,
            "submission moderated"
        );

        let Some(event) = decision_event(&submission) else {
            return Ok(submission);
        };
        if let Err(err) = self.notifications.enqueue(event) {
            warn!(submission_id = %submission.id, error = %err, "moderation notification not queued");
        }

        Ok(submission)
    }
}

/// Mail for a decided submission; a pending one has nothing to announce.
fn decision_event(submission: &Submission) -> Option<NotificationEvent> {
    match submission.status {
        ModerationStatus::Approved => Some(NotificationEvent::SubmissionApproved {
            submission_id: submission.id.clone(),
            kind: submission.kind(),
            title: submission.payload.title(),
            contact_email: submission.payload.contact_email().to_string(),
        }),
        ModerationStatus::Rejected => Some(NotificationEvent::SubmissionRejected {
            submission_id: submission.id.clone(),
            kind: submission.kind(),
            title: submission.payload.title(),
            contact_email: submission.payload.contact_email().to_string(),
            note: submission.moderator_note.clone(),
        }),
        ModerationStatus::Pending => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::moderation::StaticModerators;
    use crate::workflows::notifications::NotificationError;
    use crate::workflows::submissions::{
        InMemorySubmissionStore, JobSeekerProfile, SubmissionDraft, SubmissionPayload,
    };
    use futures::TryStreamExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<NotificationEvent>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .expect("sink mutex poisoned")
                .iter()
                .map(NotificationEvent::name)
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn enqueue(&self, event: NotificationEvent) -> Result<(), NotificationError> {
            self.events.lock().expect("sink mutex poisoned").push(event);
            Ok(())
        }
    }

    struct Fixture {
        engine: ModerationEngine<InMemorySubmissionStore>,
        repository: Arc<SubmissionRepository<InMemorySubmissionStore>>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(SubmissionRepository::new(Arc::new(
            InMemorySubmissionStore::default(),
        )));
        let sink = Arc::new(RecordingSink::default());
        let engine = ModerationEngine::new(
            repository.clone(),
            Arc::new(StaticModerators::new(["dean@school.org"])),
            sink.clone(),
        );
        Fixture {
            engine,
            repository,
            sink,
        }
    }

    fn dean() -> Actor {
        Actor::new("dean@school.org")
    }

    async fn seeker(repository: &SubmissionRepository<InMemorySubmissionStore>) -> Submission {
        repository
            .create(SubmissionDraft::new(SubmissionPayload::JobSeekerProfile(
                JobSeekerProfile {
                    name: "Morgan".to_string(),
                    email: "morgan@student.org".to_string(),
                    grade: Some(11),
                    skills: vec!["Spanish".to_string()],
                    availability: Some("Weekends".to_string()),
                    bio: None,
                },
            )))
            .await
            .expect("created")
    }

    #[tokio::test]
    async fn approve_publishes_and_notifies() {
        let fixture = fixture();
        let created = seeker(&fixture.repository).await;

        let approved = fixture
            .engine
            .approve(&dean(), &created.id)
            .await
            .expect("approved");
        assert!(approved.is_visible());
        assert_eq!(approved.moderated_by.as_deref(), Some("dean@school.org"));

        let visible: Vec<Submission> = fixture
            .engine
            .list_visible(SubmissionKind::JobSeekerProfile)
            .try_collect()
            .await
            .expect("listed");
        assert_eq!(visible.len(), 1);
        assert_eq!(fixture.sink.names(), vec!["submission_approved"]);
    }

    #[tokio::test]
    async fn only_decided_submissions_produce_mail() {
        let fixture = fixture();
        let created = seeker(&fixture.repository).await;
        assert!(decision_event(&created).is_none());

        let rejected = fixture
            .engine
            .reject(&dean(), &created.id, Some("incomplete".to_string()))
            .await
            .expect("rejected");
        assert!(matches!(
            decision_event(&rejected),
            Some(NotificationEvent::SubmissionRejected { note: Some(ref note), .. }) if note == "incomplete"
        ));
        assert_eq!(fixture.sink.names(), vec!["submission_rejected"]);
    }

    #[tokio::test]
    async fn reject_after_approve_is_invalid_and_silent() {
        let fixture = fixture();
        let created = seeker(&fixture.repository).await;
        fixture
            .engine
            .approve(&dean(), &created.id)
            .await
            .expect("approved");

        let err = fixture
            .engine
            .reject(&dean(), &created.id, Some("changed my mind".to_string()))
            .await
            .expect_err("terminal");
        assert_eq!(err.kind(), FailureKind::InvalidTransition);
        assert_eq!(fixture.sink.names(), vec!["submission_approved"]);
    }

    #[tokio::test]
    async fn reject_records_trimmed_note() {
        let fixture = fixture();
        let created = seeker(&fixture.repository).await;

        let rejected = fixture
            .engine
            .reject(&dean(), &created.id, Some("  Add availability  ".to_string()))
            .await
            .expect("rejected");
        assert_eq!(rejected.status, ModerationStatus::Rejected);
        assert_eq!(rejected.moderator_note.as_deref(), Some("Add availability"));

        let events = fixture.sink.events.lock().expect("sink mutex poisoned");
        match events.as_slice() {
            [NotificationEvent::SubmissionRejected {
                note,
                contact_email,
                ..
            }] => {
                assert_eq!(note.as_deref(), Some("Add availability"));
                assert_eq!(contact_email, "morgan@student.org");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_moderators_are_forbidden_before_any_write() {
        let fixture = fixture();
        let created = seeker(&fixture.repository).await;

        let err = fixture
            .engine
            .approve(&Actor::new("morgan@student.org"), &created.id)
            .await
            .expect_err("forbidden");
        assert_eq!(err.kind(), FailureKind::Forbidden);

        let stored = fixture.repository.get(&created.id).await.expect("stored");
        assert_eq!(stored.status, ModerationStatus::Pending);
        assert!(fixture.sink.names().is_empty());

        assert!(fixture
            .engine
            .list_by_kind(
                &Actor::new("morgan@student.org"),
                SubmissionKind::JobSeekerProfile,
                None
            )
            .is_err());
    }

    #[tokio::test]
    async fn concurrent_moderators_have_one_winner() {
        let fixture = Arc::new(fixture());
        let created = seeker(&fixture.repository).await;

        let approve = {
            let fixture = fixture.clone();
            let id = created.id.clone();
            tokio::spawn(async move { fixture.engine.approve(&dean(), &id).await })
        };
        let reject = {
            let fixture = fixture.clone();
            let id = created.id.clone();
            tokio::spawn(async move { fixture.engine.reject(&dean(), &id, None).await })
        };

        let outcomes = [
            approve.await.expect("join"),
            reject.await.expect("join"),
        ];
        let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(outcomes.iter().any(|outcome| matches!(
            outcome,
            Err(err) if err.kind() == FailureKind::InvalidTransition
        )));
        assert_eq!(fixture.sink.names().len(), 1);
    }

    #[tokio::test]
    async fn pending_queue_lists_unmoderated_only() {
        let fixture = fixture();
        let first = seeker(&fixture.repository).await;
        let second = seeker(&fixture.repository).await;
        fixture
            .engine
            .approve(&dean(), &first.id)
            .await
            .expect("approved");

        let pending: Vec<Submission> = fixture
            .engine
            .list_by_kind(
                &dean(),
                SubmissionKind::JobSeekerProfile,
                Some(ModerationStatus::Pending),
            )
            .expect("moderator")
            .try_collect()
            .await
            .expect("listed");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }
}
