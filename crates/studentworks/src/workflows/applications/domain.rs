use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::attachments::AttachmentRef;
use crate::workflows::submissions::{SubmissionId, UnknownLabel};
use crate::workflows::validation::{self, ValidationError};

/// Identifier wrapper for applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the posting contact reaches the student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantContact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ApplicantContact {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require("name", &self.name)?;
        validation::email("email", &self.email)?;
        match self.phone.as_deref() {
            Some(phone) if !phone.trim().is_empty() => validation::phone("phone", phone),
            _ => Ok(()),
        }
    }
}

/// Review state of an application. `Accepted` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Pending,
    Reviewed,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Accepted | ApplicationStatus::Rejected
        )
    }

    /// Transition table. `Reviewed` may be skipped; nothing leaves a terminal state.
    pub const fn can_transition_to(self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewed)
                | (Pending, Accepted)
                | (Pending, Rejected)
                | (Reviewed, Accepted)
                | (Reviewed, Rejected)
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ApplicationStatus {
    type Err = UnknownLabel;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "reviewed" => Ok(ApplicationStatus::Reviewed),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            _ => Err(UnknownLabel(raw.to_string())),
        }
    }
}

/// A student's application to one approved posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub posting_id: SubmissionId,
    pub contact: ApplicantContact,
    pub attachment: Option<AttachmentRef>,
    pub status: ApplicationStatus,
    pub status_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.id.clone(),
            posting_id: self.posting_id.clone(),
            applicant_name: self.contact.name.clone(),
            status: self.status.label(),
            status_note: self.status_note.clone(),
            has_attachment: self.attachment.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Shape returned to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub posting_id: SubmissionId,
    pub applicant_name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
    pub has_attachment: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An application before it is stored; owns the id its attachment is keyed by.
#[derive(Debug, Clone)]
pub struct ApplicationDraft {
    id: ApplicationId,
    pub posting_id: SubmissionId,
    pub contact: ApplicantContact,
    pub attachment: Option<AttachmentRef>,
}

impl ApplicationDraft {
    pub fn new(posting_id: SubmissionId, contact: ApplicantContact) -> Self {
        Self {
            id: ApplicationId::generate(),
            posting_id,
            contact,
            attachment: None,
        }
    }

    pub fn id(&self) -> &ApplicationId {
        &self.id
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub(crate) fn into_application(self, now: DateTime<Utc>) -> Application {
        Application {
            id: self.id,
            posting_id: self.posting_id,
            contact: self.contact,
            attachment: self.attachment,
            status: ApplicationStatus::Pending,
            status_note: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reviewer decision applied through compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: ApplicationStatus,
    pub note: Option<String>,
    pub reviewed_by: String,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn apply(&self, application: &mut Application) {
        application.status = self.status;
        application.status_note = self.note.clone();
        application.reviewed_by = Some(self.reviewed_by.clone());
        application.updated_at = self.at;
    }
}
