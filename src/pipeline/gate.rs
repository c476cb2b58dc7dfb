//! Notification gate: decides what happens to a scored message and
//! delivers immediate alerts.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::notify::format::important_email_alert;
use crate::notify::{Notification, Notifier};
use crate::retry::{RetryPolicy, with_retry};
use crate::store::{
    Database, NotificationRecord, NotificationStatus, NotificationType, ProcessedEmail,
};

/// What to do with a scored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Push a notification now.
    Alert,
    /// Hold for the daily digest.
    Digest,
    /// Record only.
    Ignore,
}

/// Score thresholds.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub importance_threshold: f64,
    /// Inclusive digest band, when the digest is enabled.
    pub digest_band: Option<(f64, f64)>,
}

impl GateConfig {
    pub fn decide(&self, score: f64) -> GateDecision {
        if score >= self.importance_threshold {
            return GateDecision::Alert;
        }
        match self.digest_band {
            Some((low, high)) if score >= low && score <= high => GateDecision::Digest,
            _ => GateDecision::Ignore,
        }
    }
}

/// Outcome of one delivery attempt (after retries).
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub receipt: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Delivers alerts and keeps the notification log.
pub struct Alerter {
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl Alerter {
    pub fn new(db: Arc<dyn Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send the alert for an already stored email. Returns whether it was
    /// delivered; `notification_sent` is only set on delivery.
    pub async fn alert(
        &self,
        email: &mut ProcessedEmail,
        score: f64,
        account_email: &str,
        today: NaiveDate,
    ) -> Result<bool, PipelineError> {
        let notification = important_email_alert(email, score, account_email, today);
        let delivered = self
            .deliver(&notification, NotificationType::Alert, Some(email.id))
            .await?
            .delivered();

        if delivered {
            let now = Utc::now();
            self.db.mark_notification_sent(email.id, now).await?;
            email.notification_sent = true;
            email.notification_sent_at = Some(now);
            info!(id = %email.message_id, score = email.importance_score, "Alert sent");
        }
        Ok(delivered)
    }

    /// Send any notification and log the attempt. Delivery failures are
    /// reported in the returned report; only store errors are returned as `Err`.
    pub async fn deliver(
        &self,
        notification: &Notification,
        kind: NotificationType,
        email_id: Option<Uuid>,
    ) -> Result<DeliveryReport, PipelineError> {
        let result = with_retry(self.retry, "notify", || self.notifier.send(notification)).await;

        let report = match result {
            Ok(delivery) => DeliveryReport {
                receipt: delivery.receipt,
                error: None,
            },
            Err(e) => {
                warn!(notifier = self.notifier.name(), error = %e, "Notification failed");
                DeliveryReport {
                    receipt: None,
                    error: Some(e.to_string()),
                }
            }
        };

        self.db
            .insert_notification(&NotificationRecord {
                id: Uuid::new_v4(),
                processed_email_id: email_id,
                notification_type: kind,
                title: notification.title.clone(),
                message: notification.message.chars().take(1000).collect(),
                priority: notification.priority.as_i32(),
                status: if report.delivered() {
                    NotificationStatus::Sent
                } else {
                    NotificationStatus::Failed
                },
                error_message: report.error.clone(),
                receipt: report.receipt.clone(),
                created_at: Utc::now(),
            })
            .await?;

        Ok(report)
    }
}
