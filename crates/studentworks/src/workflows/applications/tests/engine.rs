use super::common::*;
use crate::error::{FailureKind, TaggedFailure};
use crate::workflows::applications::{
    ApplicationDraft, ApplicationError, ApplicationStatus, ApplicationStore,
};
use crate::workflows::moderation::Actor;
use crate::workflows::notifications::NotificationEvent;
use crate::workflows::submissions::{ModerationStatus, SubmissionId};

#[tokio::test]
async fn submit_against_approved_posting_counts_applicant() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;

    let application = harness
        .engine
        .submit(ApplicationDraft::new(posting.id.clone(), contact("Avery")))
        .await
        .expect("submitted");

    assert_eq!(application.status, ApplicationStatus::Pending);
    assert_eq!(application.created_at, application.updated_at);
    assert_eq!(harness.applicant_count(&posting.id).await, 1);

    match harness.alerts.events().as_slice() {
        [NotificationEvent::ApplicationReceived {
            poster_email,
            applicant_number,
            ..
        }] => {
            assert_eq!(poster_email, "camp@ymca.org");
            assert_eq!(*applicant_number, 1);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn submit_against_unapproved_posting_never_counts() {
    let harness = harness();
    let pending = harness.pending(job_posting()).await;
    let rejected = harness.pending(volunteer_posting()).await;
    harness
        .postings
        .update_status(&rejected.id, ModerationStatus::Rejected, None, None)
        .await
        .expect("rejected");

    for posting in [&pending, &rejected] {
        let err = harness
            .engine
            .submit(ApplicationDraft::new(posting.id.clone(), contact("Avery")))
            .await
            .expect_err("not approved");
        assert!(matches!(err, ApplicationError::PostingNotApproved { .. }));
        assert_eq!(err.kind(), FailureKind::InvalidTransition);
        assert_eq!(harness.applicant_count(&posting.id).await, 0);
    }
    assert!(harness.alerts.events().is_empty());
}

#[tokio::test]
async fn submit_to_missing_posting_is_not_found() {
    let harness = harness();
    let err = harness
        .engine
        .submit(ApplicationDraft::new(
            SubmissionId("missing".to_string()),
            contact("Avery"),
        ))
        .await
        .expect_err("missing posting");
    assert!(matches!(err, ApplicationError::PostingNotFound(_)));
}

#[tokio::test]
async fn submit_to_non_posting_kind_is_validation_error() {
    let harness = harness();
    let letter = harness.approved(reference_letter()).await;
    let err = harness
        .engine
        .submit(ApplicationDraft::new(letter.id.clone(), contact("Avery")))
        .await
        .expect_err("not a posting");
    assert_eq!(err.kind(), FailureKind::Validation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_applicants_are_all_counted() {
    const APPLICANTS: usize = 32;
    let harness = harness();
    let posting = harness.approved(volunteer_posting()).await;

    let mut handles = Vec::with_capacity(APPLICANTS);
    for n in 0..APPLICANTS {
        let engine = harness.engine.clone();
        let posting_id = posting.id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit(ApplicationDraft::new(posting_id, contact(&format!("Student{n}"))))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("submitted");
    }

    assert_eq!(harness.applicant_count(&posting.id).await, APPLICANTS as u64);
    let listed = harness
        .engine
        .list_by_posting(&moderator(), &posting.id, None)
        .await
        .expect("listed");
    assert_eq!(listed.len(), APPLICANTS);
}

#[tokio::test]
async fn accepted_is_terminal_and_notifies_once() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;
    let application = harness
        .engine
        .submit(ApplicationDraft::new(posting.id.clone(), contact("Avery")))
        .await
        .expect("submitted");

    let accepted = harness
        .engine
        .transition(
            &moderator(),
            &application.id,
            ApplicationStatus::Accepted,
            Some("Start Monday".to_string()),
        )
        .await
        .expect("accepted");
    assert_eq!(accepted.status, ApplicationStatus::Accepted);
    assert_eq!(accepted.reviewed_by.as_deref(), Some("counselor@school.org"));

    let err = harness
        .engine
        .transition(
            &moderator(),
            &application.id,
            ApplicationStatus::Rejected,
            Some("too late".to_string()),
        )
        .await
        .expect_err("terminal");
    assert!(matches!(
        err,
        ApplicationError::InvalidTransition {
            from: ApplicationStatus::Accepted,
            to: ApplicationStatus::Rejected
        }
    ));

    let stored = harness.engine.get(&application.id).await.expect("stored");
    assert_eq!(stored.status_note.as_deref(), Some("Start Monday"));
    assert_eq!(stored.updated_at, accepted.updated_at);

    let changes = harness.alerts.status_changes();
    assert_eq!(changes.len(), 1);
    match &changes[0] {
        NotificationEvent::ApplicationStatusChanged {
            status,
            poster_email,
            applicant,
            ..
        } => {
            assert_eq!(*status, ApplicationStatus::Accepted);
            assert_eq!(poster_email.as_deref(), Some("camp@ymca.org"));
            assert_eq!(applicant.email, "avery@student.org");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn reviewed_is_optional_and_not_repeatable() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;
    let application = harness
        .engine
        .submit(ApplicationDraft::new(posting.id.clone(), contact("Blake")))
        .await
        .expect("submitted");

    let reviewed = harness
        .engine
        .transition(&moderator(), &application.id, ApplicationStatus::Reviewed, None)
        .await
        .expect("reviewed");
    assert_eq!(reviewed.status, ApplicationStatus::Reviewed);

    let err = harness
        .engine
        .transition(&moderator(), &application.id, ApplicationStatus::Reviewed, None)
        .await
        .expect_err("same status");
    assert_eq!(err.kind(), FailureKind::InvalidTransition);

    harness
        .engine
        .transition(&moderator(), &application.id, ApplicationStatus::Rejected, None)
        .await
        .expect("rejected after review");

    match harness.alerts.status_changes().as_slice() {
        [NotificationEvent::ApplicationStatusChanged {
            poster_email: first,
            ..
        }, NotificationEvent::ApplicationStatusChanged {
            poster_email: second,
            ..
        }] => {
            assert!(first.is_none(), "reviewed is not relayed to the poster");
            assert!(second.is_some());
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn transition_requires_moderator() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;
    let application = harness
        .engine
        .submit(ApplicationDraft::new(posting.id.clone(), contact("Casey")))
        .await
        .expect("submitted");

    let err = harness
        .engine
        .transition(
            &Actor::new("casey@student.org"),
            &application.id,
            ApplicationStatus::Accepted,
            None,
        )
        .await
        .expect_err("forbidden");
    assert_eq!(err.kind(), FailureKind::Forbidden);

    let stored = harness
        .applications
        .fetch(&application.id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(stored.status, ApplicationStatus::Pending);
}

#[tokio::test]
async fn transition_unknown_application_is_not_found() {
    let harness = harness();
    let err = harness
        .engine
        .transition(
            &moderator(),
            &crate::workflows::applications::ApplicationId("nope".to_string()),
            ApplicationStatus::Reviewed,
            None,
        )
        .await
        .expect_err("missing");
    assert_eq!(err.kind(), FailureKind::NotFound);
}

#[tokio::test]
async fn list_by_posting_is_oldest_first_and_filterable() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;
    let mut ids = Vec::new();
    for name in ["Ari", "Bo", "Cy"] {
        let application = harness
            .engine
            .submit(ApplicationDraft::new(posting.id.clone(), contact(name)))
            .await
            .expect("submitted");
        ids.push(application.id);
    }
    harness
        .engine
        .transition(&moderator(), &ids[1], ApplicationStatus::Reviewed, None)
        .await
        .expect("reviewed");

    let all = harness
        .engine
        .list_by_posting(&moderator(), &posting.id, None)
        .await
        .expect("listed");
    let listed: Vec<_> = all.iter().map(|application| application.id.clone()).collect();
    assert_eq!(listed, ids);

    let reviewed = harness
        .engine
        .list_by_posting(&moderator(), &posting.id, Some(ApplicationStatus::Reviewed))
        .await
        .expect("listed");
    assert_eq!(reviewed.len(), 1);
    assert_eq!(reviewed[0].contact.name, "Bo");

    let err = harness
        .engine
        .list_by_posting(&Actor::new("bo@student.org"), &posting.id, None)
        .await
        .expect_err("forbidden");
    assert_eq!(err.kind(), FailureKind::Forbidden);
}

#[tokio::test]
async fn upload_is_owned_by_the_new_application() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;

    let application = harness
        .engine
        .submit_with_upload(posting.id.clone(), contact("Dev"), Some(resume()))
        .await
        .expect("submitted");

    let attachment = application.attachment.as_ref().expect("attachment stored");
    assert!(attachment.is_owned_by(&application.id.0));
    assert_eq!(
        attachment.content_type,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    assert_eq!(harness.blobs.len(), 1);
}

#[tokio::test]
async fn upload_to_pending_posting_stores_nothing() {
    let harness = harness();
    let posting = harness.pending(job_posting()).await;

    let err = harness
        .engine
        .submit_with_upload(posting.id.clone(), contact("Dev"), Some(resume()))
        .await
        .expect_err("pending posting");
    assert_eq!(err.kind(), FailureKind::InvalidTransition);
    assert!(harness.blobs.is_empty());
}

#[tokio::test]
async fn invalid_contact_is_rejected_before_io() {
    let harness = harness();
    let posting = harness.approved(job_posting()).await;
    let mut bad = contact("Eli");
    bad.email = "eli-at-school".to_string();

    let err = harness
        .engine
        .submit_with_upload(posting.id.clone(), bad, Some(resume()))
        .await
        .expect_err("bad email");
    assert_eq!(err.kind(), FailureKind::Validation);
    assert!(harness.blobs.is_empty());
    assert_eq!(harness.applicant_count(&posting.id).await, 0);
}
