//! Feedback learning: per-sender and per-domain score adjustments.

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{DatabaseError, PipelineError};
use crate::store::{
    Database, FeedbackRecord, FeedbackType, LearnedPattern, PatternType,
};

/// Newest feedback never weighs more than this in the running average.
const MAX_NEW_WEIGHT: f64 = 0.5;

/// Result of recording one piece of feedback.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub email_id: Uuid,
    pub feedback_type: FeedbackType,
    pub sender: String,
    /// Adjustment now applied to this sender's future scores.
    pub total_adjustment: f64,
}

/// Blend a new adjustment into an existing one after `count` observations
/// (the new one included).
pub fn blend(existing: f64, count: i64, new: f64) -> f64 {
    let weight = (1.0 / count.max(1) as f64).min(MAX_NEW_WEIGHT);
    existing * (1.0 - weight) + new * weight
}

fn domain_of(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, d)| d).filter(|d| !d.is_empty())
}

async fn learn(
    db: &dyn Database,
    pattern_type: PatternType,
    value: &str,
    adjustment: f64,
) -> Result<LearnedPattern, DatabaseError> {
    let now = Utc::now();
    let pattern = match db.get_learned_pattern(pattern_type, value).await? {
        Some(mut existing) => {
            existing.feedback_count += 1;
            existing.score_adjustment =
                blend(existing.score_adjustment, existing.feedback_count, adjustment);
            existing.updated_at = now;
            existing
        }
        None => LearnedPattern {
            id: Uuid::new_v4(),
            pattern_type,
            pattern_value: value.to_string(),
            score_adjustment: adjustment,
            feedback_count: 1,
            created_at: now,
            updated_at: now,
        },
    };
    db.upsert_learned_pattern(&pattern).await?;
    Ok(pattern)
}

/// Update the sender pattern with the full adjustment and the domain
/// pattern with half of it.
pub async fn update_patterns(
    db: &dyn Database,
    sender_email: &str,
    feedback: FeedbackType,
) -> Result<(), DatabaseError> {
    let sender = sender_email.trim().to_lowercase();
    let adjustment = feedback.adjustment();

    learn(db, PatternType::Sender, &sender, adjustment).await?;
    if let Some(domain) = domain_of(&sender) {
        learn(db, PatternType::Domain, domain, adjustment / 2.0).await?;
    }
    Ok(())
}

/// Sum of the learned sender and domain adjustments for an address.
pub async fn total_adjustment(db: &dyn Database, email: &str) -> Result<f64, DatabaseError> {
    let email = email.trim().to_lowercase();
    let mut total = 0.0;
    if let Some(p) = db.get_learned_pattern(PatternType::Sender, &email).await? {
        total += p.score_adjustment;
    }
    if let Some(domain) = domain_of(&email)
        && let Some(p) = db.get_learned_pattern(PatternType::Domain, domain).await?
    {
        total += p.score_adjustment;
    }
    Ok(total)
}

/// Record user feedback on a processed email and learn from it.
pub async fn record_feedback(
    db: &dyn Database,
    email_id: Uuid,
    feedback: FeedbackType,
) -> Result<FeedbackOutcome, PipelineError> {
    let email = db
        .get_processed_email(email_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "email".into(),
            id: email_id.to_string(),
        })?;

    db.insert_feedback(&FeedbackRecord {
        id: Uuid::new_v4(),
        processed_email_id: email.id,
        feedback_type: feedback,
        original_score: email.importance_score,
        created_at: Utc::now(),
    })
    .await?;

    update_patterns(db, &email.sender_email, feedback).await?;
    let total = total_adjustment(db, &email.sender_email).await?;

    info!(
        email_id = %email.id,
        sender = %email.sender_email,
        feedback = feedback.as_str(),
        total_adjustment = total,
        "Recorded feedback"
    );

    Ok(FeedbackOutcome {
        email_id: email.id,
        feedback_type: feedback,
        sender: email.sender_email,
        total_adjustment: total,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{Account, AccountCredentials, LibSqlBackend, ProcessedEmail};

    async fn db_with_email(sender: &str) -> (Arc<dyn Database>, Uuid) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let account = Account::new(&AccountCredentials {
            email: "me@x.com".into(),
            display_name: None,
            access_token: None,
            refresh_token: "r".into(),
            token_expiry: None,
        });
        db.insert_account(&account).await.unwrap();
        let now = Utc::now();
        let email = ProcessedEmail {
            id: Uuid::new_v4(),
            account_id: account.id,
            message_id: "m1".into(),
            thread_id: None,
            sender_email: sender.into(),
            sender_name: None,
            subject: "Weekly deals".into(),
            received_at: now,
            is_whitelisted: false,
            importance_score: 0.72,
            importance_reason: None,
            category: None,
            notification_sent: true,
            notification_sent_at: Some(now),
            deadline_date: None,
            deadline_text: None,
            digest_eligible: false,
            digest_sent: false,
            digest_sent_at: None,
            processed_at: now,
        };
        db.insert_processed_email(&email).await.unwrap();
        (db, email.id)
    }

    #[test]
    fn blend_weights() {
        // Second observation: 50/50.
        assert!((blend(-0.15, 2, 0.10) - (-0.025)).abs() < 1e-9);
        // Fourth observation: 25% new.
        assert!((blend(-0.15, 4, -0.15) - (-0.15)).abs() < 1e-9);
        assert!((blend(0.0, 4, 0.10) - 0.025).abs() < 1e-9);
        // Weight never exceeds one half.
        assert!((blend(0.0, 1, 0.10) - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn not_important_feedback_learns_sender_and_domain() {
        let (db, id) = db_with_email("Deals@Shop.com").await;
        let outcome = record_feedback(db.as_ref(), id, FeedbackType::NotImportant)
            .await
            .unwrap();
        assert!((outcome.total_adjustment - (-0.225)).abs() < 1e-9);

        let sender = db
            .get_learned_pattern(PatternType::Sender, "deals@shop.com")
            .await
            .unwrap()
            .unwrap();
        assert!((sender.score_adjustment + 0.15).abs() < 1e-9);
        let domain = db
            .get_learned_pattern(PatternType::Domain, "shop.com")
            .await
            .unwrap()
            .unwrap();
        assert!((domain.score_adjustment + 0.075).abs() < 1e-9);

        let stats = db.feedback_stats().await.unwrap();
        assert_eq!(stats.total_feedback, 1);
        assert_eq!(stats.learned_patterns, 2);
    }

    #[tokio::test]
    async fn repeated_feedback_blends() {
        let (db, id) = db_with_email("deals@shop.com").await;
        record_feedback(db.as_ref(), id, FeedbackType::NotImportant).await.unwrap();
        record_feedback(db.as_ref(), id, FeedbackType::Important).await.unwrap();

        let sender = db
            .get_learned_pattern(PatternType::Sender, "deals@shop.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender.feedback_count, 2);
        assert!((sender.score_adjustment - (-0.025)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_email_is_not_found() {
        let (db, _) = db_with_email("a@b.com").await;
        let err = record_feedback(db.as_ref(), Uuid::new_v4(), FeedbackType::Important)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Store(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn no_patterns_means_no_adjustment() {
        let (db, _) = db_with_email("a@b.com").await;
        assert_eq!(total_adjustment(db.as_ref(), "a@b.com").await.unwrap(), 0.0);
    }
}
