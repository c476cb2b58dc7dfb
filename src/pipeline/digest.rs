//! Daily digest of notable-but-not-urgent emails.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::notify::format::truncate;
use crate::notify::{Notification, Priority, Sound};
use crate::pipeline::gate::Alerter;
use crate::store::{Database, NotificationType, ProcessedEmail};

/// Entries listed individually; the rest are summarized.
const MAX_DIGEST_ENTRIES: usize = 10;
const SENDER_CHARS: usize = 25;
const SUBJECT_CHARS: usize = 40;

pub const NOTHING_PENDING: &str = "No emails pending for digest";

/// Result of a digest run.
#[derive(Debug, Clone, Serialize)]
pub struct DigestOutcome {
    pub success: bool,
    pub emails_included: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// HTML body for a digest, or `None` when there is nothing to send.
pub fn build_digest_message(emails: &[ProcessedEmail]) -> Option<String> {
    if emails.is_empty() {
        return None;
    }

    let mut parts = vec![format!("<b>{} notable emails</b>", emails.len())];
    for (i, email) in emails.iter().take(MAX_DIGEST_ENTRIES).enumerate() {
        let mut line = format!(
            "{}. <b>{}</b>\n   {}\n   Score: {:.0}%",
            i + 1,
            truncate(email.sender_display(), SENDER_CHARS),
            truncate(&email.subject, SUBJECT_CHARS),
            email.importance_score * 100.0,
        );
        if let Some(deadline) = &email.deadline_text {
            line.push_str(&format!("\n   Deadline: {deadline}"));
        }
        parts.push(line);
    }
    if emails.len() > MAX_DIGEST_ENTRIES {
        parts.push(format!("...and {} more", emails.len() - MAX_DIGEST_ENTRIES));
    }

    Some(parts.join("\n\n"))
}

/// Sends the digest and prunes the notification log.
pub struct DigestSender {
    db: Arc<dyn Database>,
    alerter: Alerter,
    retention_days: u32,
}

impl DigestSender {
    pub fn new(db: Arc<dyn Database>, alerter: Alerter, retention_days: u32) -> Self {
        Self {
            db,
            alerter,
            retention_days,
        }
    }

    pub async fn send_digest(&self) -> Result<DigestOutcome, PipelineError> {
        let emails = self.db.pending_digest_emails().await?;

        let outcome = match build_digest_message(&emails) {
            None => {
                info!("No pending digest emails to send");
                DigestOutcome {
                    success: true,
                    emails_included: 0,
                    message: Some(NOTHING_PENDING.into()),
                    error: None,
                }
            }
            Some(body) => {
                let notification = Notification::new(
                    format!("Email Digest ({} emails)", emails.len()),
                    body,
                )
                .with_priority(Priority::Low, Sound::None)
                .html();

                let report = self
                    .alerter
                    .deliver(&notification, NotificationType::Digest, None)
                    .await?;

                if report.delivered() {
                    let ids: Vec<_> = emails.iter().map(|e| e.id).collect();
                    self.db.mark_digest_sent(&ids, Utc::now()).await?;
                    info!(count = emails.len(), "Digest sent");
                    DigestOutcome {
                        success: true,
                        emails_included: emails.len(),
                        message: Some(format!("Digest sent with {} emails", emails.len())),
                        error: None,
                    }
                } else {
                    DigestOutcome {
                        success: false,
                        emails_included: 0,
                        message: None,
                        error: report.error,
                    }
                }
            }
        };

        self.prune().await;
        Ok(outcome)
    }

    async fn prune(&self) {
        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
        if let Err(e) = self.db.prune_notifications(cutoff).await {
            warn!(error = %e, "Failed to prune notification log");
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::{Account, AccountCredentials, LibSqlBackend, NotificationRecord, NotificationStatus};
    use crate::testing::RecordingNotifier;

    fn email(sender: &str, subject: &str, score: f64) -> ProcessedEmail {
        let now = Utc::now();
        ProcessedEmail {
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            message_id: Uuid::new_v4().to_string(),
            thread_id: None,
            sender_email: sender.into(),
            sender_name: None,
            subject: subject.into(),
            received_at: now,
            is_whitelisted: false,
            importance_score: score,
            importance_reason: None,
            category: None,
            notification_sent: false,
            notification_sent_at: None,
            deadline_date: None,
            deadline_text: None,
            digest_eligible: true,
            digest_sent: false,
            digest_sent_at: None,
            processed_at: now,
        }
    }

    #[test]
    fn empty_digest_has_no_message() {
        assert!(build_digest_message(&[]).is_none());
    }

    #[test]
    fn entries_are_formatted() {
        let mut e = email("a-very-long-sender-address@example.com", "Quarterly planning offsite agenda and logistics", 0.62);
        e.deadline_text = Some("RSVP by Friday".into());
        let msg = build_digest_message(&[e]).unwrap();

        assert!(msg.starts_with("<b>1 notable emails</b>\n\n1. <b>"));
        assert!(msg.contains("<b>a-very-long-sender-addres...</b>"));
        assert!(msg.contains("   Quarterly planning offsite agenda and l..."));
        assert!(msg.contains("Score: 62%"));
        assert!(msg.contains("Deadline: RSVP by Friday"));
        assert!(!msg.contains("more"));
    }

    #[test]
    fn more_than_ten_are_summarized() {
        let emails: Vec<_> = (0..13)
            .map(|i| email(&format!("s{i}@x.com"), &format!("Subject {i}"), 0.6))
            .collect();
        let msg = build_digest_message(&emails).unwrap();
        assert!(msg.starts_with("<b>13 notable emails</b>"));
        assert!(msg.contains("10. <b>s9@x.com</b>"));
        assert!(!msg.contains("11. "));
        assert!(msg.ends_with("...and 3 more"));
    }

    async fn seeded(db: &Arc<dyn Database>, scores: &[f64]) {
        let account = Account::new(&AccountCredentials {
            email: "me@x.com".into(),
            display_name: None,
            access_token: None,
            refresh_token: "r".into(),
            token_expiry: None,
        });
        db.insert_account(&account).await.unwrap();
        for (i, score) in scores.iter().enumerate() {
            let mut e = email(&format!("s{i}@x.com"), &format!("Subject {i}"), *score);
            e.account_id = account.id;
            db.insert_processed_email(&e).await.unwrap();
        }
    }

    fn sender(db: &Arc<dyn Database>, notifier: Arc<RecordingNotifier>) -> DigestSender {
        DigestSender::new(Arc::clone(db), Alerter::new(Arc::clone(db), notifier), 30)
    }

    #[tokio::test]
    async fn nothing_pending_is_success() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let outcome = sender(&db, notifier.clone()).send_digest().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.emails_included, 0);
        assert_eq!(outcome.message.as_deref(), Some(NOTHING_PENDING));
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn digest_marks_emails_sent_once() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        seeded(&db, &[0.55, 0.65]).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let digest = sender(&db, notifier.clone());

        let outcome = digest.send_digest().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.emails_included, 2);

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent[0].title, "Email Digest (2 emails)");
        assert_eq!(sent[0].priority, Priority::Low);
        assert_eq!(sent[0].sound, Sound::None);
        assert!(sent[0].message.find("s1@x.com") < sent[0].message.find("s0@x.com"));

        let again = digest.send_digest().await.unwrap();
        assert_eq!(again.emails_included, 0);
        assert_eq!(db.digest_stats().await.unwrap().total_digested, 2);
    }

    #[tokio::test]
    async fn failed_digest_keeps_emails_pending() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        seeded(&db, &[0.6]).await;
        let notifier = Arc::new(RecordingNotifier::failing("quota exceeded"));

        let outcome = sender(&db, notifier).send_digest().await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("quota exceeded"));
        assert_eq!(db.digest_stats().await.unwrap().pending_digest, 1);

        let log = db.recent_notifications(5).await.unwrap();
        assert_eq!(log[0].notification_type, NotificationType::Digest);
        assert_eq!(log[0].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn old_log_entries_are_pruned() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.insert_notification(&NotificationRecord {
            id: Uuid::new_v4(),
            processed_email_id: None,
            notification_type: NotificationType::Alert,
            title: "old".into(),
            message: "old".into(),
            priority: 0,
            status: NotificationStatus::Sent,
            error_message: None,
            receipt: None,
            created_at: Utc::now() - Duration::days(45),
        })
        .await
        .unwrap();

        sender(&db, Arc::new(RecordingNotifier::default()))
            .send_digest()
            .await
            .unwrap();
        assert!(db.recent_notifications(5).await.unwrap().is_empty());
    }
}
