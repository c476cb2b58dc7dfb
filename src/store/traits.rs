//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::model::{
    Account, AccountCredentials, DigestStats, EmailStats, EntryType, FeedbackRecord,
    FeedbackStats, LearnedPattern, ListKind, NotificationRecord, PatternType, ProcessedEmail,
    RuleChange, SenderRule,
};

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError>;

    /// All accounts, active first, then by email.
    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    async fn list_active_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    async fn count_active_accounts(&self) -> Result<usize, DatabaseError>;

    /// Insert an active account unless `max_active` accounts are already
    /// active. The count and the insert are one statement. Returns whether the
    /// account was stored.
    async fn insert_account_within_limit(
        &self,
        account: &Account,
        max_active: usize,
    ) -> Result<bool, DatabaseError>;

    /// Replace the credentials of an existing account, reactivate it and
    /// reset its sync cursor. An inactive account is only reactivated while
    /// fewer than `max_active` accounts are active; `false` means the limit
    /// refused it.
    async fn replace_account_credentials(
        &self,
        id: Uuid,
        credentials: &AccountCredentials,
        max_active: usize,
    ) -> Result<bool, DatabaseError>;

    /// Store a freshly refreshed access token.
    async fn update_account_token(
        &self,
        id: Uuid,
        access_token: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    /// Record a finished sync: new cursor (if any) and check time.
    async fn update_account_sync(
        &self,
        id: Uuid,
        history_id: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Soft-disable or re-enable an account. Returns false if it does not exist.
    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<bool, DatabaseError>;

    /// Permanently delete an account and its processed emails.
    async fn delete_account(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Sender lists ────────────────────────────────────────────────

    /// Add an entry, reactivating a previously removed one.
    async fn add_sender_rule(
        &self,
        list: ListKind,
        entry_type: EntryType,
        value: &str,
        notes: Option<&str>,
    ) -> Result<(SenderRule, RuleChange), DatabaseError>;

    /// Active entries of a list, newest first.
    async fn list_sender_rules(&self, list: ListKind) -> Result<Vec<SenderRule>, DatabaseError>;

    async fn update_sender_rule_notes(
        &self,
        list: ListKind,
        id: Uuid,
        notes: Option<&str>,
    ) -> Result<Option<SenderRule>, DatabaseError>;

    /// Soft-delete an entry. Returns false if no active entry has this id.
    async fn deactivate_sender_rule(&self, list: ListKind, id: Uuid) -> Result<bool, DatabaseError>;

    /// Find the active entry matching an address: exact email first, then domain.
    async fn match_sender_rule(
        &self,
        list: ListKind,
        email: &str,
    ) -> Result<Option<SenderRule>, DatabaseError>;

    // ── Processed emails ────────────────────────────────────────────

    async fn is_email_processed(
        &self,
        account_id: Uuid,
        message_id: &str,
    ) -> Result<bool, DatabaseError>;

    async fn insert_processed_email(&self, email: &ProcessedEmail) -> Result<(), DatabaseError>;

    async fn get_processed_email(&self, id: Uuid) -> Result<Option<ProcessedEmail>, DatabaseError>;

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Most recently processed emails across all accounts.
    async fn recent_processed_emails(&self, limit: usize)
    -> Result<Vec<ProcessedEmail>, DatabaseError>;

    async fn processed_emails_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ProcessedEmail>, DatabaseError>;

    /// Digest-eligible emails not yet included in a digest, highest score first.
    async fn pending_digest_emails(&self) -> Result<Vec<ProcessedEmail>, DatabaseError>;

    async fn mark_digest_sent(
        &self,
        ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Totals plus counts since `day_start`.
    async fn email_stats(&self, day_start: DateTime<Utc>) -> Result<EmailStats, DatabaseError>;

    async fn digest_stats(&self) -> Result<DigestStats, DatabaseError>;

    // ── Notification log ────────────────────────────────────────────

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError>;

    async fn recent_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DatabaseError>;

    /// Delete log rows older than `before`. Returns the number removed.
    async fn prune_notifications(&self, before: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // ── Feedback ────────────────────────────────────────────────────

    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<(), DatabaseError>;

    async fn get_learned_pattern(
        &self,
        pattern_type: PatternType,
        value: &str,
    ) -> Result<Option<LearnedPattern>, DatabaseError>;

    /// Insert a pattern or overwrite adjustment and count of an existing one.
    async fn upsert_learned_pattern(&self, pattern: &LearnedPattern) -> Result<(), DatabaseError>;

    /// Patterns with the largest absolute adjustment first.
    async fn list_learned_patterns(&self, limit: usize)
    -> Result<Vec<LearnedPattern>, DatabaseError>;

    async fn feedback_stats(&self) -> Result<FeedbackStats, DatabaseError>;
}
