//! Persisted entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of mailboxes that can be active at once.
pub const MAX_ACTIVE_ACCOUNTS: usize = 3;

/// Tokens this close to expiry are refreshed before use.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

// ── Accounts ────────────────────────────────────────────────────────

/// A connected mailbox.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// Incremental-sync cursor (Gmail history id).
    pub last_history_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh, active account from connect-time credentials.
    pub fn new(credentials: &AccountCredentials) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: credentials.email.trim().to_lowercase(),
            display_name: credentials.display_name.clone(),
            access_token: credentials.access_token.clone(),
            refresh_token: Some(credentials.refresh_token.clone()),
            token_expiry: credentials.token_expiry,
            is_active: true,
            last_check: None,
            last_history_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expired when the expiry is unknown or within a minute of `now`.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.access_token.as_deref(), self.token_expiry) {
            (Some(_), Some(expiry)) => now >= expiry - Duration::seconds(TOKEN_EXPIRY_SKEW_SECS),
            _ => true,
        }
    }
}

/// Credentials handed over by the OAuth connect flow.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountCredentials {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    pub refresh_token: String,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
}

// ── Sender lists ────────────────────────────────────────────────────

/// Which sender list an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Whitelist,
    Blacklist,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Whitelist => "whitelist",
            ListKind::Blacklist => "blacklist",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entry matches a full address or a whole domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Email,
    Domain,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Email => "email",
            EntryType::Domain => "domain",
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(EntryType::Email),
            "domain" => Ok(EntryType::Domain),
            other => Err(format!("unknown entry type '{other}'")),
        }
    }
}

/// A whitelist or blacklist entry.
#[derive(Debug, Clone, Serialize)]
pub struct SenderRule {
    pub id: Uuid,
    pub list: ListKind,
    pub entry_type: EntryType,
    pub value: String,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of adding an entry to a sender list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleChange {
    Created,
    Reactivated,
    AlreadyPresent,
}

// ── Processed emails ────────────────────────────────────────────────

/// A message that went through scoring, kept for dedup, digests and feedback.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEmail {
    pub id: Uuid,
    pub account_id: Uuid,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub is_whitelisted: bool,
    pub importance_score: f64,
    pub importance_reason: Option<String>,
    pub category: Option<String>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub deadline_date: Option<NaiveDate>,
    pub deadline_text: Option<String>,
    pub digest_eligible: bool,
    pub digest_sent: bool,
    pub digest_sent_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEmail {
    /// Name to show for the sender: display name when known, else the address.
    pub fn sender_display(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.sender_email)
    }
}

// ── Notification log ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Alert,
    Digest,
    Test,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Alert => "alert",
            NotificationType::Digest => "digest",
            NotificationType::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

/// One delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub processed_email_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: i32,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub receipt: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Feedback ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Important,
    NotImportant,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Important => "important",
            FeedbackType::NotImportant => "not_important",
        }
    }

    /// Score adjustment this feedback teaches for the sender.
    pub fn adjustment(&self) -> f64 {
        match self {
            FeedbackType::Important => 0.10,
            FeedbackType::NotImportant => -0.15,
        }
    }
}

impl FromStr for FeedbackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "important" => Ok(FeedbackType::Important),
            "not_important" => Ok(FeedbackType::NotImportant),
            other => Err(format!("unknown feedback type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub processed_email_id: Uuid,
    pub feedback_type: FeedbackType,
    pub original_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Sender,
    Domain,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Sender => "sender",
            PatternType::Domain => "domain",
        }
    }
}

/// Score adjustment learned from feedback for a sender or a domain.
#[derive(Debug, Clone, Serialize)]
pub struct LearnedPattern {
    pub id: Uuid,
    pub pattern_type: PatternType,
    pub pattern_value: String,
    pub score_adjustment: f64,
    pub feedback_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmailStats {
    pub total_processed: i64,
    pub total_notified: i64,
    pub processed_today: i64,
    pub notified_today: i64,
    pub active_accounts: i64,
    pub whitelist_entries: i64,
    pub blacklist_entries: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DigestStats {
    pub pending_digest: i64,
    pub total_digested: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackStats {
    pub total_feedback: i64,
    pub important_count: i64,
    pub not_important_count: i64,
    pub learned_patterns: i64,
}
