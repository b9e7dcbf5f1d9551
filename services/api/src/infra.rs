use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use studentworks::config::AppConfig;
use studentworks::workflows::applications::InMemoryApplicationStore;
use studentworks::workflows::attachments::MemoryBlobStore;
use studentworks::workflows::moderation::StaticModerators;
use studentworks::workflows::notifications::{
    MailError, MailMessage, Mailer, NotificationDispatcher, NotificationSink,
};
use studentworks::workflows::submissions::InMemorySubmissionStore;
use studentworks::workflows::Board;
use tracing::info;

pub(crate) type MemoryBoard = Board<InMemorySubmissionStore, InMemoryApplicationStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) notifications: NotificationDispatcher,
}

/// Writes outgoing mail to the log instead of a transport.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            "mail accepted"
        );
        Ok(())
    }
}

pub(crate) fn build_board(
    config: &AppConfig,
    notifications: Arc<dyn NotificationSink>,
) -> MemoryBoard {
    Board::new(
        Arc::new(InMemorySubmissionStore::default()),
        Arc::new(InMemoryApplicationStore::default()),
        Arc::new(MemoryBlobStore::default()),
        Arc::new(StaticModerators::from_config(&config.moderation)),
        notifications,
    )
}
