use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::workflows::applications::{
    ApplicantContact, Application, ApplicationEngine, ApplicationId, ApplicationStatus,
    ApplicationStore, InMemoryApplicationStore, StatusChange,
};
use crate::workflows::attachments::{AttachmentRef, AttachmentStore, MemoryBlobStore, Upload};
use crate::workflows::moderation::{Actor, ModeratorDirectory, StaticModerators};
use crate::workflows::notifications::{NotificationError, NotificationEvent, NotificationSink};
use crate::workflows::store::StoreError;
use crate::workflows::submissions::{
    InMemorySubmissionStore, JobPosting, ModerationStatus, ReferenceLetter, StatusUpdate,
    Submission, SubmissionDraft, SubmissionId, SubmissionKind, SubmissionPayload,
    SubmissionRepository, SubmissionStore, VolunteerPosting,
};

pub(super) fn moderator() -> Actor {
    Actor::new("counselor@school.org")
}

pub(super) fn moderators() -> Arc<dyn ModeratorDirectory> {
    Arc::new(StaticModerators::new(["counselor@school.org"]))
}

pub(super) fn contact(name: &str) -> ApplicantContact {
    ApplicantContact {
        name: name.to_string(),
        email: format!("{}@student.org", name.to_ascii_lowercase()),
        phone: Some("515-555-0100".to_string()),
    }
}

pub(super) fn resume() -> Upload {
    Upload::new(
        "resume.docx",
        None,
        Bytes::from_static(b"PK\x03\x04 resume body"),
    )
}

pub(super) fn job_posting() -> SubmissionPayload {
    SubmissionPayload::JobPosting(JobPosting {
        title: "Camp Counselor".to_string(),
        employer: "YMCA".to_string(),
        location: "West Des Moines, IA".to_string(),
        description: "Summer day camp".to_string(),
        pay: Some("$13/hr".to_string()),
        hours: Some("M-F 8-4".to_string()),
        contact_email: "camp@ymca.org".to_string(),
    })
}

pub(super) fn volunteer_posting() -> SubmissionPayload {
    SubmissionPayload::VolunteerPosting(VolunteerPosting {
        title: "Food pantry helper".to_string(),
        organization: "DMARC".to_string(),
        location: "Des Moines, IA".to_string(),
        description: "Sort donations".to_string(),
        hours_per_week: Some(3),
        contact_email: "volunteer@dmarc.org".to_string(),
    })
}

pub(super) fn reference_letter() -> SubmissionPayload {
    SubmissionPayload::ReferenceLetter(ReferenceLetter {
        student_name: "Quinn".to_string(),
        student_email: "quinn@student.org".to_string(),
        reference_name: "Mr. Ortiz".to_string(),
        reference_email: "ortiz@school.org".to_string(),
        relationship: "Chemistry teacher".to_string(),
        body: None,
    })
}

#[derive(Default)]
pub(super) struct MemoryAlerts {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemoryAlerts {
    pub(super) fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }

    pub(super) fn status_changes(&self) -> Vec<NotificationEvent> {
        self.events()
            .into_iter()
            .filter(|event| matches!(event, NotificationEvent::ApplicationStatusChanged { .. }))
            .collect()
    }
}

impl NotificationSink for MemoryAlerts {
    fn enqueue(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        self.events.lock().expect("alert mutex poisoned").push(event);
        Ok(())
    }
}

/// Submission store whose counter updates can be switched off to simulate a crash.
#[derive(Default, Clone)]
pub(super) struct FlakyCounterStore {
    inner: InMemorySubmissionStore,
    fail_increments: Arc<AtomicBool>,
}

impl FlakyCounterStore {
    pub(super) fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubmissionStore for FlakyCounterStore {
    async fn insert(&self, submission: Submission) -> Result<Submission, StoreError> {
        self.inner.insert(submission).await
    }

    async fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn scan(
        &self,
        kind: SubmissionKind,
        status: Option<ModerationStatus>,
    ) -> Result<Vec<Submission>, StoreError> {
        self.inner.scan(kind, status).await
    }

    async fn compare_and_set_status(
        &self,
        id: &SubmissionId,
        expected: ModerationStatus,
        update: StatusUpdate,
    ) -> Result<Submission, StoreError> {
        self.inner.compare_and_set_status(id, expected, update).await
    }

    async fn append_file(
        &self,
        id: &SubmissionId,
        file: AttachmentRef,
    ) -> Result<Submission, StoreError> {
        self.inner.append_file(id, file).await
    }

    async fn increment_applicants(&self, id: &SubmissionId, delta: u64) -> Result<u64, StoreError> {
        if self.fail_increments.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("counter shard offline".to_string()));
        }
        self.inner.increment_applicants(id, delta).await
    }

    async fn compare_and_set_applicants(
        &self,
        id: &SubmissionId,
        expected: u64,
        count: u64,
    ) -> Result<(), StoreError> {
        self.inner
            .compare_and_set_applicants(id, expected, count)
            .await
    }
}

/// Application store whose next count parks until the test releases it.
#[derive(Default)]
pub(super) struct StallingCounts {
    inner: InMemoryApplicationStore,
    armed: AtomicBool,
    counted: Notify,
    resume: Notify,
    counts: AtomicUsize,
}

impl StallingCounts {
    pub(super) fn stall_next_count(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub(super) async fn wait_until_counted(&self) {
        self.counted.notified().await;
    }

    pub(super) fn resume(&self) {
        self.resume.notify_one();
    }

    pub(super) fn counts(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApplicationStore for StallingCounts {
    async fn insert(&self, application: Application) -> Result<Application, StoreError> {
        self.inner.insert(application).await
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn list_by_posting(
        &self,
        posting_id: &SubmissionId,
    ) -> Result<Vec<Application>, StoreError> {
        self.inner.list_by_posting(posting_id).await
    }

    async fn compare_and_set_status(
        &self,
        id: &ApplicationId,
        expected: ApplicationStatus,
        change: StatusChange,
    ) -> Result<Application, StoreError> {
        self.inner.compare_and_set_status(id, expected, change).await
    }

    async fn remove(&self, id: &ApplicationId) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }

    async fn count_by_posting(&self, posting_id: &SubmissionId) -> Result<u64, StoreError> {
        let count = self.inner.count_by_posting(posting_id).await?;
        self.counts.fetch_add(1, Ordering::SeqCst);
        if self.armed.swap(false, Ordering::SeqCst) {
            self.counted.notify_one();
            self.resume.notified().await;
        }
        Ok(count)
    }
}

pub(super) struct Harness<S: SubmissionStore + 'static, A: ApplicationStore + 'static> {
    pub(super) engine: Arc<ApplicationEngine<S, A>>,
    pub(super) postings: Arc<SubmissionRepository<S>>,
    pub(super) submissions: Arc<S>,
    pub(super) applications: Arc<A>,
    pub(super) blobs: Arc<MemoryBlobStore>,
    pub(super) alerts: Arc<MemoryAlerts>,
}

impl<S, A> Harness<S, A>
where
    S: SubmissionStore + 'static,
    A: ApplicationStore + 'static,
{
    pub(super) fn with_stores(submissions: S, applications: A) -> Self {
        let submissions = Arc::new(submissions);
        let applications = Arc::new(applications);
        let postings = Arc::new(SubmissionRepository::new(submissions.clone()));
        let blobs = Arc::new(MemoryBlobStore::default());
        let alerts = Arc::new(MemoryAlerts::default());
        let engine = Arc::new(ApplicationEngine::new(
            postings.clone(),
            applications.clone(),
            AttachmentStore::new(blobs.clone()),
            moderators(),
            alerts.clone(),
        ));
        Self {
            engine,
            postings,
            submissions,
            applications,
            blobs,
            alerts,
        }
    }

    pub(super) async fn pending(&self, payload: SubmissionPayload) -> Submission {
        self.postings
            .create(SubmissionDraft::new(payload))
            .await
            .expect("posting created")
    }

    pub(super) async fn approved(&self, payload: SubmissionPayload) -> Submission {
        let created = self.pending(payload).await;
        self.postings
            .update_status(&created.id, ModerationStatus::Approved, None, None)
            .await
            .expect("posting approved")
    }

    pub(super) async fn applicant_count(&self, id: &SubmissionId) -> u64 {
        self.postings
            .get(id)
            .await
            .expect("posting present")
            .applicant_count
    }
}

pub(super) type MemoryHarness = Harness<InMemorySubmissionStore, InMemoryApplicationStore>;

pub(super) fn harness() -> MemoryHarness {
    Harness::with_stores(
        InMemorySubmissionStore::default(),
        InMemoryApplicationStore::default(),
    )
}
