//! Best-effort mail for moderation and application events.

pub mod dispatcher;
pub mod event;
pub mod mailer;

pub use dispatcher::{
    DispatchStats, NotificationDispatcher, NotificationError, NotificationSink, RetryPolicy,
};
pub use event::{MailRouting, NotificationEvent};
pub use mailer::{MailError, MailMessage, Mailer};
