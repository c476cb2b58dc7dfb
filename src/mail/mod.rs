//! Mailbox access: token refresh and incremental fetch of unread mail.

pub mod gmail;
pub mod parse;

pub use gmail::GmailClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MailError;
use crate::store::Account;

/// A message pulled from a mailbox, ready for scoring.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedEmail {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub snippet: String,
    /// Plain-text body, HTML stripped, capped in length.
    pub body_text: String,
    pub received_at: DateTime<Utc>,
    pub labels: Vec<String>,
}

/// A fresh OAuth access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of one fetch against a mailbox.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub emails: Vec<FetchedEmail>,
    /// Cursor to store once the batch has been handled.
    pub cursor: Option<String>,
}

/// A source of new mail for connected accounts.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Exchange the account's refresh token for a new access token.
    async fn refresh_access_token(&self, account: &Account) -> Result<AccessToken, MailError>;

    /// Unread inbox messages since `cursor` (or the latest unread ones when
    /// there is no usable cursor). Incremental listings stop at the first
    /// history record boundary at or past `max`, and the returned cursor then
    /// resumes after the last record listed.
    async fn fetch_new(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        max: usize,
    ) -> Result<FetchBatch, MailError>;
}
