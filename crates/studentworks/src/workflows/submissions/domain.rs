use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::attachments::{AttachmentRef, AttachmentSummary};
use crate::workflows::validation::{self, ValidationError};

/// Identifier wrapper for board submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionKind {
    JobPosting,
    JobSeekerProfile,
    VolunteerPosting,
    ReferenceLetter,
}

impl SubmissionKind {
    pub const ALL: [SubmissionKind; 4] = [
        SubmissionKind::JobPosting,
        SubmissionKind::JobSeekerProfile,
        SubmissionKind::VolunteerPosting,
        SubmissionKind::ReferenceLetter,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            SubmissionKind::JobPosting => "job_posting",
            SubmissionKind::JobSeekerProfile => "job_seeker_profile",
            SubmissionKind::VolunteerPosting => "volunteer_posting",
            SubmissionKind::ReferenceLetter => "reference_letter",
        }
    }

    /// Kinds that accept applications and carry an applicant count.
    pub const fn is_posting(self) -> bool {
        matches!(
            self,
            SubmissionKind::JobPosting | SubmissionKind::VolunteerPosting
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value '{0}'")]
pub struct UnknownLabel(pub String);

impl FromStr for SubmissionKind {
    type Err = UnknownLabel;

    /// Accepts `JobPosting`, `job_posting`, `job-posting` and friends.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let squashed: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match squashed.as_str() {
            "jobposting" | "jobs" => Ok(SubmissionKind::JobPosting),
            "jobseekerprofile" | "jobseekers" => Ok(SubmissionKind::JobSeekerProfile),
            "volunteerposting" | "volunteering" => Ok(SubmissionKind::VolunteerPosting),
            "referenceletter" | "references" => Ok(SubmissionKind::ReferenceLetter),
            _ => Err(UnknownLabel(raw.to_string())),
        }
    }
}

/// Visibility state of a submission. Only `Pending` may change, and only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, ModerationStatus::Pending)
    }

    pub const fn can_transition_to(self, next: ModerationStatus) -> bool {
        matches!(
            (self, next),
            (ModerationStatus::Pending, ModerationStatus::Approved)
                | (ModerationStatus::Pending, ModerationStatus::Rejected)
        )
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModerationStatus {
    type Err = UnknownLabel;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ModerationStatus::Pending),
            "approved" => Ok(ModerationStatus::Approved),
            "rejected" => Ok(ModerationStatus::Rejected),
            _ => Err(UnknownLabel(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub employer: String,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub pay: Option<String>,
    #[serde(default)]
    pub hours: Option<String>,
    pub contact_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolunteerPosting {
    pub title: String,
    pub organization: String,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub hours_per_week: Option<u8>,
    pub contact_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSeekerProfile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLetter {
    pub student_name: String,
    pub student_email: String,
    pub reference_name: String,
    pub reference_email: String,
    pub relationship: String,
    #[serde(default)]
    pub body: Option<String>,
}

/// Kind-specific fields; the serde tag doubles as the submission kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SubmissionPayload {
    JobPosting(JobPosting),
    JobSeekerProfile(JobSeekerProfile),
    VolunteerPosting(VolunteerPosting),
    ReferenceLetter(ReferenceLetter),
}

impl SubmissionPayload {
    pub fn kind(&self) -> SubmissionKind {
        match self {
            SubmissionPayload::JobPosting(_) => SubmissionKind::JobPosting,
            SubmissionPayload::JobSeekerProfile(_) => SubmissionKind::JobSeekerProfile,
            SubmissionPayload::VolunteerPosting(_) => SubmissionKind::VolunteerPosting,
            SubmissionPayload::ReferenceLetter(_) => SubmissionKind::ReferenceLetter,
        }
    }

    /// Address told about the moderation outcome.
    pub fn contact_email(&self) -> &str {
        match self {
            SubmissionPayload::JobPosting(posting) => &posting.contact_email,
            SubmissionPayload::JobSeekerProfile(profile) => &profile.email,
            SubmissionPayload::VolunteerPosting(posting) => &posting.contact_email,
            SubmissionPayload::ReferenceLetter(letter) => &letter.reference_email,
        }
    }

    pub fn title(&self) -> String {
        match self {
            SubmissionPayload::JobPosting(posting) => {
                format!("{} at {}", posting.title, posting.employer)
            }
            SubmissionPayload::JobSeekerProfile(profile) => {
                format!("job seeker profile for {}", profile.name)
            }
            SubmissionPayload::VolunteerPosting(posting) => {
                format!("{} with {}", posting.title, posting.organization)
            }
            SubmissionPayload::ReferenceLetter(letter) => {
                format!("reference for {}", letter.student_name)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SubmissionPayload::JobPosting(posting) => {
                validation::require("title", &posting.title)?;
                validation::require("employer", &posting.employer)?;
                validation::require("location", &posting.location)?;
                validation::require("description", &posting.description)?;
                validation::optional("pay", posting.pay.as_deref())?;
                validation::optional("hours", posting.hours.as_deref())?;
                validation::email("contact_email", &posting.contact_email)
            }
            SubmissionPayload::VolunteerPosting(posting) => {
                validation::require("title", &posting.title)?;
                validation::require("organization", &posting.organization)?;
                validation::require("location", &posting.location)?;
                validation::require("description", &posting.description)?;
                if posting.hours_per_week == Some(0) {
                    return Err(ValidationError::new(
                        "hours_per_week",
                        "must be at least one hour",
                    ));
                }
                validation::email("contact_email", &posting.contact_email)
            }
            SubmissionPayload::JobSeekerProfile(profile) => {
                validation::require("name", &profile.name)?;
                validation::email("email", &profile.email)?;
                if let Some(grade) = profile.grade {
                    if !(9..=12).contains(&grade) {
                        return Err(ValidationError::new("grade", "must be between 9 and 12"));
                    }
                }
                for skill in &profile.skills {
                    validation::require("skills", skill)?;
                }
                validation::optional("availability", profile.availability.as_deref())?;
                validation::optional("bio", profile.bio.as_deref())
            }
            SubmissionPayload::ReferenceLetter(letter) => {
                validation::require("student_name", &letter.student_name)?;
                validation::email("student_email", &letter.student_email)?;
                validation::require("reference_name", &letter.reference_name)?;
                validation::email("reference_email", &letter.reference_email)?;
                validation::require("relationship", &letter.relationship)?;
                validation::optional("body", letter.body.as_deref())
            }
        }
    }
}

/// A moderated record on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub payload: SubmissionPayload,
    pub attachment: Option<AttachmentRef>,
    pub status: ModerationStatus,
    pub created_at: DateTime<Utc>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<String>,
    pub moderator_note: Option<String>,
    pub submitted_by: Option<String>,
    /// Maintained by atomic increments; only meaningful for postings.
    pub applicant_count: u64,
    /// Administrative uploads added by moderators after intake.
    #[serde(default)]
    pub files: Vec<AttachmentRef>,
}

impl Submission {
    pub fn kind(&self) -> SubmissionKind {
        self.payload.kind()
    }

    pub fn is_visible(&self) -> bool {
        self.status == ModerationStatus::Approved
    }

    pub fn is_posting(&self) -> bool {
        self.kind().is_posting()
    }

    pub fn applicant_count(&self) -> Option<u64> {
        self.is_posting().then_some(self.applicant_count)
    }

    pub fn view(&self) -> SubmissionView {
        SubmissionView {
            id: self.id.clone(),
            kind: self.kind().label(),
            status: self.status.label(),
            title: self.payload.title(),
            payload: self.payload.clone(),
            has_attachment: self.attachment.is_some(),
            created_at: self.created_at,
            moderated_at: self.moderated_at,
            moderator_note: self.moderator_note.clone(),
            applicant_count: self.applicant_count(),
            files: self.files.iter().map(AttachmentRef::summary).collect(),
            visible: self.is_visible(),
        }
    }
}

/// Public shape of a submission; omits moderator identity and storage URLs.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionView {
    pub id: SubmissionId,
    pub kind: &'static str,
    pub status: &'static str,
    pub title: String,
    pub payload: SubmissionPayload,
    pub has_attachment: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderator_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_count: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<AttachmentSummary>,
    pub visible: bool,
}

/// A submission before it is stored. The id is minted here so attachments can be owned by it.
#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    id: SubmissionId,
    pub payload: SubmissionPayload,
    pub attachment: Option<AttachmentRef>,
    pub submitted_by: Option<String>,
}

impl SubmissionDraft {
    pub fn new(payload: SubmissionPayload) -> Self {
        Self {
            id: SubmissionId::generate(),
            payload,
            attachment: None,
            submitted_by: None,
        }
    }

    pub fn id(&self) -> &SubmissionId {
        &self.id
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn submitted_by(mut self, email: Option<String>) -> Self {
        self.submitted_by = email;
        self
    }
}

/// Moderator decision applied through compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ModerationStatus,
    pub note: Option<String>,
    pub moderated_by: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn apply(&self, submission: &mut Submission) {
        submission.status = self.status;
        submission.moderated_at = Some(self.at);
        submission.moderated_by = self.moderated_by.clone();
        submission.moderator_note = self.note.clone();
    }
}
