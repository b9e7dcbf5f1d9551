use std::fmt::Write as _;

use serde::Serialize;

use super::mailer::MailMessage;
use crate::config::NotificationConfig;
use crate::workflows::applications::{ApplicantContact, ApplicationId, ApplicationStatus};
use crate::workflows::submissions::{SubmissionId, SubmissionKind};

/// Lifecycle events relayed to admins, posters, and applicants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    SubmissionReceived {
        submission_id: SubmissionId,
        kind: SubmissionKind,
        title: String,
    },
    SubmissionApproved {
        submission_id: SubmissionId,
        kind: SubmissionKind,
        title: String,
        contact_email: String,
    },
    SubmissionRejected {
        submission_id: SubmissionId,
        kind: SubmissionKind,
        title: String,
        contact_email: String,
        note: Option<String>,
    },
    ApplicationReceived {
        application_id: ApplicationId,
        posting_id: SubmissionId,
        posting_title: String,
        poster_email: String,
        applicant_name: String,
        applicant_number: u64,
    },
    ApplicationStatusChanged {
        application_id: ApplicationId,
        posting_id: SubmissionId,
        posting_title: Option<String>,
        applicant: ApplicantContact,
        status: ApplicationStatus,
        note: Option<String>,
        /// Present only for terminal decisions.
        poster_email: Option<String>,
    },
}

/// Addresses that are not carried on the event itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRouting {
    pub admin_email: Option<String>,
    pub from_address: String,
}

impl From<&NotificationConfig> for MailRouting {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            admin_email: config.admin_email.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

impl Default for MailRouting {
    fn default() -> Self {
        MailRouting::from(&NotificationConfig::default())
    }
}

impl NotificationEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            NotificationEvent::SubmissionReceived { .. } => "submission_received",
            NotificationEvent::SubmissionApproved { .. } => "submission_approved",
            NotificationEvent::SubmissionRejected { .. } => "submission_rejected",
            NotificationEvent::ApplicationReceived { .. } => "application_received",
            NotificationEvent::ApplicationStatusChanged { .. } => "application_status_changed",
        }
    }

    /// Renders the mail for every interested party. Pure; delivery happens elsewhere.
    pub fn messages(&self, routing: &MailRouting) -> Vec<MailMessage> {
        let mail = |to: &str, subject: String, body: String| MailMessage {
            from: routing.from_address.clone(),
            to: to.to_string(),
            subject,
            body,
        };

        match self {
            NotificationEvent::SubmissionReceived {
                submission_id,
                kind,
                title,
            } => routing
                .admin_email
                .as_deref()
                .map(|admin| {
                    mail(
                        admin,
                        format!("New {} awaiting review", kind.label().replace('_', " ")),
                        format!(
                            "\"{title}\" ({submission_id}) was submitted and is waiting for moderation."
                        ),
                    )
                })
                .into_iter()
                .collect(),
            NotificationEvent::SubmissionApproved {
                title,
                contact_email,
                ..
            } => vec![mail(
                contact_email,
                format!("Approved: {title}"),
                format!("Your submission \"{title}\" has been approved and is now visible to students."),
            )],
            NotificationEvent::SubmissionRejected {
                title,
                contact_email,
                note,
                ..
            } => {
                let mut body = format!("Your submission \"{title}\" was not approved.");
                if let Some(note) = note {
                    let _ = write!(body, "\n\nModerator note: {note}");
                }
                vec![mail(contact_email, format!("Not approved: {title}"), body)]
            }
            NotificationEvent::ApplicationReceived {
                posting_title,
                poster_email,
                applicant_name,
                applicant_number,
                ..
            } => vec![mail(
                poster_email,
                format!("Applicant #{applicant_number} for {posting_title}"),
                format!("{applicant_name} applied to \"{posting_title}\"."),
            )],
            NotificationEvent::ApplicationStatusChanged {
                posting_title,
                applicant,
                status,
                note,
                poster_email,
                ..
            } => {
                let posting = posting_title.as_deref().unwrap_or("your application");
                let mut body = format!(
                    "Hi {}, your application for \"{posting}\" is now {}.",
                    applicant.name,
                    status.label()
                );
                if let Some(note) = note {
                    let _ = write!(body, "\n\nNote from the reviewer: {note}");
                }

                let mut messages = vec![mail(
                    &applicant.email,
                    format!("Application update: {}", status.label()),
                    body,
                )];

                if status.is_terminal() {
                    if let Some(poster) = poster_email {
                        messages.push(mail(
                            poster,
                            format!("Applicant {} {}", applicant.name, status.label()),
                            format!(
                                "{} ({}) was marked {} for \"{posting}\".",
                                applicant.name,
                                applicant.email,
                                status.label()
                            ),
                        ));
                    }
                }
                messages
            }
        }
    }
}
