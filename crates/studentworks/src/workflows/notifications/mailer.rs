use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail transport collaborator. Acceptance is reported synchronously at this boundary.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("recipient rejected: {0}")]
    Rejected(String),
    #[error("mail transport unavailable: {0}")]
    Unavailable(String),
}

impl MailError {
    /// A rejected recipient will not be accepted on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Unavailable(_))
    }
}
