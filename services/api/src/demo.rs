use async_trait::async_trait;
use bytes::Bytes;
use clap::Args;
use futures::TryStreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use studentworks::error::AppError;
use studentworks::workflows::applications::{
    ApplicantContact, ApplicationStatus, InMemoryApplicationStore,
};
use studentworks::workflows::attachments::{MemoryBlobStore, Upload};
use studentworks::workflows::moderation::{Actor, StaticModerators};
use studentworks::workflows::notifications::{
    MailError, MailMessage, MailRouting, Mailer, NotificationDispatcher, RetryPolicy,
};
use studentworks::workflows::submissions::{
    InMemorySubmissionStore, JobPosting, Submission, SubmissionKind, SubmissionPayload,
    VolunteerPosting,
};
use studentworks::workflows::Board;

const DEMO_MODERATOR: &str = "counselor@studentworks.local";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Number of leading mail sends that fail before the relay recovers.
    #[arg(long, default_value_t = 0)]
    pub(crate) mail_failures: u32,
    /// Delivery attempts per message before it is dropped.
    #[arg(long, default_value_t = 3)]
    pub(crate) max_attempts: u32,
    /// Skip the application portion of the demo.
    #[arg(long)]
    pub(crate) skip_applications: bool,
}

/// Prints each message; the first `failures` sends report the relay as unavailable.
struct ConsoleMailer {
    failures: u32,
    sends: AtomicU32,
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            println!("    [mail] attempt {attempt}: relay unavailable ({})", message.subject);
            return Err(MailError::Unavailable("demo relay offline".to_string()));
        }
        println!("    [mail] to={} subject={}", message.to, message.subject);
        Ok(())
    }
}

type DemoBoard = Board<InMemorySubmissionStore, InMemoryApplicationStore>;

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        mail_failures,
        max_attempts,
        skip_applications,
    } = args;

    let dispatcher = NotificationDispatcher::spawn(
        Arc::new(ConsoleMailer {
            failures: mail_failures,
            sends: AtomicU32::new(0),
        }),
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        MailRouting {
            admin_email: Some(DEMO_MODERATOR.to_string()),
            ..MailRouting::default()
        },
    );
    let board: DemoBoard = Board::new(
        Arc::new(InMemorySubmissionStore::default()),
        Arc::new(InMemoryApplicationStore::default()),
        Arc::new(MemoryBlobStore::default()),
        Arc::new(StaticModerators::new([DEMO_MODERATOR])),
        Arc::new(dispatcher.clone()),
    );
    let moderator = Actor::new(DEMO_MODERATOR);

    println!("Student Works Board demo");
    println!("========================");

    println!("\n[1] Moderated job posting");
    let Some(posting) = demo_moderation(&board, &moderator).await else {
        dispatcher.flush().await;
        return Ok(());
    };

    if skip_applications {
        println!("\n[2] Applications skipped (--skip-applications)");
    } else {
        println!("\n[2] Volunteer applications");
        demo_applications(&board, &moderator).await;
    }

    dispatcher.flush().await;
    let stats = dispatcher.stats();
    println!("\n[3] Notification delivery");
    println!(
        "  messages: enqueued={} delivered={} dropped={} attempts={}",
        stats.enqueued, stats.delivered, stats.dropped, stats.attempts
    );
    if stats.dropped > 0 {
        println!(
            "  Mail was dropped, yet posting {} is still {}",
            posting.id,
            current_status(&board, &posting).await
        );
    }

    Ok(())
}

async fn demo_moderation(board: &DemoBoard, moderator: &Actor) -> Option<Submission> {
    let payload = SubmissionPayload::JobPosting(JobPosting {
        title: "Weekend Barista".to_string(),
        employer: "Corner Grounds Coffee".to_string(),
        location: "Des Moines, IA".to_string(),
        description: "Saturday and Sunday morning shifts, training provided".to_string(),
        pay: Some("$12/hr".to_string()),
        hours: Some("12/wk".to_string()),
        contact_email: "hiring@cornergrounds.example".to_string(),
    });

    let submission = match board.intake().submit(payload, None, None).await {
        Ok(submission) => submission,
        Err(err) => {
            println!("  Submission failed: {err}");
            return None;
        }
    };
    println!("  Submitted {} as {}", submission.id, submission.status);
    println!(
        "  Public job listings before approval: {}",
        visible_count(board, SubmissionKind::JobPosting).await
    );

    let approved = match board.moderation().approve(moderator, &submission.id).await {
        Ok(approved) => approved,
        Err(err) => {
            println!("  Approval failed: {err}");
            return None;
        }
    };
    println!("  Approved by {}", moderator.email);
    println!(
        "  Public job listings after approval: {}",
        visible_count(board, SubmissionKind::JobPosting).await
    );

    match board
        .moderation()
        .reject(moderator, &submission.id, Some("second thoughts".to_string()))
        .await
    {
        Ok(_) => println!("  Unexpected: an approved posting was rejected"),
        Err(err) => println!("  Rejecting afterwards is refused: {err}"),
    }

    match serde_json::to_string_pretty(&approved.view()) {
        Ok(json) => println!("  Public payload:\n{json}"),
        Err(err) => println!("  Public payload unavailable: {err}"),
    }

    Some(approved)
}

async fn demo_applications(board: &DemoBoard, moderator: &Actor) {
    let payload = SubmissionPayload::VolunteerPosting(VolunteerPosting {
        title: "Food Pantry Helper".to_string(),
        organization: "Eastside Community Pantry".to_string(),
        location: "Des Moines, IA".to_string(),
        description: "Sort donations and pack weekly boxes".to_string(),
        hours_per_week: Some(3),
        contact_email: "volunteers@eastsidepantry.example".to_string(),
    });

    let posting = match board.intake().submit(payload, None, None).await {
        Ok(posting) => posting,
        Err(err) => {
            println!("  Posting failed: {err}");
            return;
        }
    };
    if let Err(err) = board.moderation().approve(moderator, &posting.id).await {
        println!("  Approval failed: {err}");
        return;
    }

    let applicants = [
        ("Maya Chen", "maya@student.example"),
        ("Theo Alvarez", "theo@student.example"),
    ];
    let mut submitted = Vec::new();
    for (name, email) in applicants {
        let contact = ApplicantContact {
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
        };
        let resume = Upload::new(
            "resume.pdf",
            Some("application/pdf"),
            Bytes::from(format!("%PDF-1.4 resume for {name}")),
        );
        match board
            .applications()
            .submit_with_upload(posting.id.clone(), contact, Some(resume))
            .await
        {
            Ok(application) => {
                println!("  {name} applied ({})", application.id.0);
                submitted.push(application);
            }
            Err(err) => println!("  {name} could not apply: {err}"),
        }
    }

    let count = match board.submissions().get(&posting.id).await {
        Ok(stored) => stored.applicant_count,
        Err(err) => {
            println!("  Posting lookup failed: {err}");
            return;
        }
    };
    println!("  Applicant count: {count}");

    let Some(first) = submitted.first() else {
        return;
    };
    for (status, note) in [
        (ApplicationStatus::Reviewed, None),
        (
            ApplicationStatus::Accepted,
            Some("See you Saturday at 9".to_string()),
        ),
        (ApplicationStatus::Rejected, None),
    ] {
        match board
            .applications()
            .transition(moderator, &first.id, status, note)
            .await
        {
            Ok(updated) => println!("  {} -> {}", first.contact.name, updated.status.label()),
            Err(err) => println!("  {} -> {}: refused ({err})", first.contact.name, status.label()),
        }
    }

    match board.applications().recount(&posting.id).await {
        Ok(recounted) => println!("  Recount confirms {recounted} applicants"),
        Err(err) => println!("  Recount failed: {err}"),
    }
}

async fn visible_count(board: &DemoBoard, kind: SubmissionKind) -> usize {
    match board
        .moderation()
        .list_visible(kind)
        .try_collect::<Vec<_>>()
        .await
    {
        Ok(listing) => listing.len(),
        Err(err) => {
            println!("  Listing unavailable: {err}");
            0
        }
    }
}

async fn current_status(board: &DemoBoard, posting: &Submission) -> String {
    match board.submissions().get(&posting.id).await {
        Ok(stored) => stored.status.to_string(),
        Err(err) => format!("unknown ({err})"),
    }
}
