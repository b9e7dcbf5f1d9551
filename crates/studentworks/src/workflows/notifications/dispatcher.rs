use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::event::{MailRouting, NotificationEvent};
use super::mailer::{MailMessage, Mailer};
use crate::config::NotificationConfig;

/// Where the engines hand off events once a transition has committed.
pub trait NotificationSink: Send + Sync {
    fn enqueue(&self, event: NotificationEvent) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification dispatcher has shut down")]
    Closed,
}

/// Bounded exponential backoff for a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the `failures`-th failed attempt.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&NotificationConfig::default())
    }
}

impl From<&NotificationConfig> for RetryPolicy {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_backoff,
            max_delay: config.max_backoff,
        }
    }
}

/// Deliveries allowed to run at once when no limit is configured.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    attempts: AtomicU64,
}

/// Snapshot of dispatcher activity; message counts, not event counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub attempts: u64,
}

enum DispatchCommand {
    Deliver(NotificationEvent),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget queue in front of the mail transport.
///
/// `enqueue` never waits. A background worker renders each event and delivers
/// it on its own task, retrying transient failures with exponential backoff and
/// dropping the message once attempts run out. Nothing here can undo the state
/// change that produced the event.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::UnboundedSender<DispatchCommand>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, policy: RetryPolicy, routing: MailRouting) -> Self {
        Self::spawn_with_limit(mailer, policy, routing, DEFAULT_MAX_IN_FLIGHT)
    }

    /// Like `spawn`, but at most `max_in_flight` messages are mid-delivery at once.
    /// Backoff sleeps hold their slot; queued messages wait for one.
    pub fn spawn_with_limit(
        mailer: Arc<dyn Mailer>,
        policy: RetryPolicy,
        routing: MailRouting,
        max_in_flight: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            receiver,
            mailer,
            policy,
            routing: Arc::new(routing),
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            counters: Arc::clone(&counters),
        };
        tokio::spawn(worker.run());

        Self { sender, counters }
    }

    pub fn from_config(mailer: Arc<dyn Mailer>, config: &NotificationConfig) -> Self {
        Self::spawn_with_limit(
            mailer,
            RetryPolicy::from(config),
            MailRouting::from(config),
            config.max_in_flight,
        )
    }

    /// Resolves once every event enqueued before this call has been delivered or dropped.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(DispatchCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
        }
    }
}

impl NotificationSink for NotificationDispatcher {
    fn enqueue(&self, event: NotificationEvent) -> Result<(), NotificationError> {
        let name = event.name();
        self.sender
            .send(DispatchCommand::Deliver(event))
            .map_err(|_| {
                warn!(event = name, "notification dropped: dispatcher closed");
                NotificationError::Closed
            })?;
        debug!(event = name, "notification enqueued");
        Ok(())
    }
}

struct Worker {
    receiver: mpsc::UnboundedReceiver<DispatchCommand>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
    routing: Arc<MailRouting>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(mut self) {
        let mut in_flight = JoinSet::new();
        let mut waiting: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(DispatchCommand::Deliver(event)) => {
                        let messages = event.messages(&self.routing);
                        self.counters
                            .enqueued
                            .fetch_add(messages.len() as u64, Ordering::Relaxed);
                        for message in messages {
                            in_flight.spawn(deliver(
                                Arc::clone(&self.mailer),
                                Arc::clone(&self.slots),
                                message,
                                self.policy,
                                Arc::clone(&self.counters),
                                event.name(),
                            ));
                        }
                        if in_flight.is_empty() {
                            release(&mut waiting);
                        }
                    }
                    Some(DispatchCommand::Flush(done)) => {
                        if in_flight.is_empty() {
                            let _ = done.send(());
                        } else {
                            waiting.push(done);
                        }
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "notification delivery task failed");
                    }
                    if in_flight.is_empty() {
                        release(&mut waiting);
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "notification delivery task failed");
            }
        }
        release(&mut waiting);
    }
}

fn release(waiting: &mut Vec<oneshot::Sender<()>>) {
    for done in waiting.drain(..) {
        let _ = done.send(());
    }
}

async fn deliver(
    mailer: Arc<dyn Mailer>,
    slots: Arc<Semaphore>,
    message: MailMessage,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    event: &'static str,
) {
    // The semaphore is never closed.
    let Ok(_slot) = slots.acquire_owned().await else {
        return;
    };
    let mut attempt = 0;
    loop {
        attempt += 1;
        counters.attempts.fetch_add(1, Ordering::Relaxed);

        match mailer.send(&message).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(event, to = %message.to, attempt, "notification delivered");
                return;
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                debug!(event, to = %message.to, attempt, ?delay, error = %err, "notification delivery failed; retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(event, to = %message.to, attempt, error = %err, "notification dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::notifications::mailer::MailError;
    use crate::workflows::submissions::{SubmissionId, SubmissionKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails the first `failures` sends, then accepts.
    struct FlakyMailer {
        failures: u32,
        error: fn() -> MailError,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyMailer {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                error: || MailError::Unavailable("smtp timeout".to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().expect("calls mutex poisoned").len()
        }
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
            let mut calls = self.calls.lock().expect("calls mutex poisoned");
            calls.push(message.to.clone());
            if calls.len() as u32 <= self.failures {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn approved(email: &str) -> NotificationEvent {
        NotificationEvent::SubmissionApproved {
            submission_id: SubmissionId("s-1".to_string()),
            kind: SubmissionKind::JobPosting,
            title: "Tutor at Library".to_string(),
            contact_email: email.to_string(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_until_delivered() {
        let mailer = Arc::new(FlakyMailer::new(2));
        let dispatcher =
            NotificationDispatcher::spawn(mailer.clone(), fast_policy(), MailRouting::default());

        dispatcher.enqueue(approved("tutor@library.org")).expect("queued");
        dispatcher.flush().await;

        assert_eq!(mailer.calls(), 3);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mailer = Arc::new(FlakyMailer::new(u32::MAX));
        let dispatcher =
            NotificationDispatcher::spawn(mailer.clone(), fast_policy(), MailRouting::default());

        dispatcher.enqueue(approved("tutor@library.org")).expect("queued");
        dispatcher.flush().await;

        assert_eq!(mailer.calls(), 3);
        assert_eq!(dispatcher.stats().dropped, 1);
        assert_eq!(dispatcher.stats().delivered, 0);
    }

    #[tokio::test]
    async fn rejected_recipients_are_not_retried() {
        let mailer = Arc::new(FlakyMailer {
            failures: u32::MAX,
            error: || MailError::Rejected("mailbox unknown".to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let dispatcher =
            NotificationDispatcher::spawn(mailer.clone(), fast_policy(), MailRouting::default());

        dispatcher.enqueue(approved("nobody@library.org")).expect("queued");
        dispatcher.flush().await;

        assert_eq!(mailer.calls(), 1);
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn flush_with_nothing_queued_returns() {
        let dispatcher = NotificationDispatcher::spawn(
            Arc::new(FlakyMailer::new(0)),
            fast_policy(),
            MailRouting::default(),
        );
        dispatcher.flush().await;
        assert_eq!(dispatcher.stats(), DispatchStats::default());
    }

    #[tokio::test]
    async fn events_without_recipients_are_counted_as_nothing() {
        let mailer = Arc::new(FlakyMailer::new(0));
        let dispatcher =
            NotificationDispatcher::spawn(mailer.clone(), fast_policy(), MailRouting::default());

        dispatcher
            .enqueue(NotificationEvent::SubmissionReceived {
                submission_id: SubmissionId("s-2".to_string()),
                kind: SubmissionKind::ReferenceLetter,
                title: "reference for Sam".to_string(),
            })
            .expect("queued");
        dispatcher.flush().await;

        assert_eq!(mailer.calls(), 0);
        assert_eq!(dispatcher.stats().enqueued, 0);
    }

    /// Tracks how many sends overlap.
    #[derive(Default)]
    struct SlowMailer {
        active: AtomicU64,
        peak: AtomicU64,
    }

    #[async_trait]
    impl Mailer for SlowMailer {
        async fn send(&self, _message: &MailMessage) -> Result<(), MailError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_deliveries_respect_the_limit() {
        let mailer = Arc::new(SlowMailer::default());
        let dispatcher = NotificationDispatcher::spawn_with_limit(
            mailer.clone(),
            fast_policy(),
            MailRouting::default(),
            2,
        );

        for n in 0..6 {
            dispatcher
                .enqueue(approved(&format!("poster{n}@library.org")))
                .expect("queued");
        }
        dispatcher.flush().await;

        assert!(mailer.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.stats().delivered, 6);
    }
}
