//! The four moderated submission kinds and the repository that stores them.

pub mod domain;
pub mod intake;
pub mod memory;
pub mod repository;

pub use domain::{
    JobPosting, JobSeekerProfile, ModerationStatus, ReferenceLetter, StatusUpdate, Submission,
    SubmissionDraft, SubmissionId, SubmissionKind, SubmissionPayload, SubmissionView,
    UnknownLabel, VolunteerPosting,
};
pub use intake::{IntakeError, SubmissionIntake};
pub use memory::InMemorySubmissionStore;
pub use repository::{RepositoryError, SubmissionRepository, SubmissionStore};
