//! Gmail REST client.
//!
//! Uses `users.history.list` for incremental sync, `users.messages.list`
//! for the initial (or stale-cursor) sync and `users.messages.get` with
//! `format=raw` for message content.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::MailError;
use crate::mail::parse::{RawEnvelope, decode_raw, parse_message};
use crate::mail::{AccessToken, FetchBatch, FetchedEmail, MailSource};
use crate::store::Account;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UNREAD: &str = "UNREAD";
/// `users.messages.list` rejects larger pages.
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    id: Option<String>,
    #[serde(default)]
    messages_added: Vec<HistoryMessage>,
}

/// Message ids added since a cursor. `resume_from` is set when `max` cut
/// the listing short and names the last history record fully listed.
struct HistoryListing {
    ids: Vec<String>,
    resume_from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    raw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    history_id: Option<String>,
}

/// Gmail API client shared by all accounts.
pub struct GmailClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    api_base: String,
    token_url: String,
}

impl GmailClient {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            client_id: client_id.into(),
            client_secret,
            api_base: GMAIL_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    /// Override the API and token endpoints.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    fn auth_headers(&self, access_token: &str) -> Result<HeaderMap, MailError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|e| MailError::Http(format!("invalid header: {e}")))?,
        );
        Ok(headers)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        access_token: &str,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailError> {
        let url = format!("{}{}", self.api_base, endpoint);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers(access_token)?)
            .query(query)
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => response
                .json()
                .await
                .map_err(|e| MailError::Http(format!("parse {endpoint}: {e}"))),
            401 | 403 => Err(MailError::AuthFailed {
                account: "gmail".into(),
                reason: response.text().await.unwrap_or_else(|_| format!("HTTP {status}")),
            }),
            404 => Err(MailError::NotFound {
                id: endpoint.to_string(),
            }),
            429 => Err(MailError::RateLimited),
            _ => Err(MailError::Http(format!("{endpoint}: HTTP {status}"))),
        }
    }

    async fn list_unread(&self, access_token: &str, max: usize) -> Result<Vec<String>, MailError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        while ids.len() < max {
            let mut query = vec![
                ("labelIds", "INBOX".to_string()),
                ("labelIds", UNREAD.to_string()),
                ("maxResults", (max - ids.len()).min(MAX_PAGE_SIZE).to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let list: MessageListResponse = self.get(access_token, "/messages", &query).await?;
            ids.extend(list.messages.into_iter().map(|m| m.id));
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        ids.truncate(max);
        Ok(ids)
    }

    async fn list_history(
        &self,
        access_token: &str,
        cursor: &str,
        max: usize,
    ) -> Result<HistoryListing, MailError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut last_listed: Option<String> = None;
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("startHistoryId", cursor.to_string()),
                ("historyTypes", "messageAdded".to_string()),
                ("labelId", "INBOX".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let page: HistoryListResponse = match self.get(access_token, "/history", &query).await {
                Ok(page) => page,
                Err(MailError::NotFound { .. }) => {
                    return Err(MailError::HistoryExpired {
                        cursor: cursor.to_string(),
                    });
                }
                Err(e) => return Err(e),
            };

            for record in page.history {
                if ids.len() >= max {
                    return Ok(HistoryListing {
                        ids,
                        resume_from: Some(last_listed.unwrap_or_else(|| cursor.to_string())),
                    });
                }
                ids.extend(
                    record
                        .messages_added
                        .into_iter()
                        .map(|m| m.message.id)
                        .filter(|id| seen.insert(id.clone())),
                );
                if record.id.is_some() {
                    last_listed = record.id;
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    return Ok(HistoryListing {
                        ids,
                        resume_from: None,
                    });
                }
            }
        }
    }

    async fn get_message(&self, access_token: &str, id: &str) -> Result<FetchedEmail, MailError> {
        let query = [("format", "raw".to_string())];
        let raw: RawMessage = self
            .get(access_token, &format!("/messages/{id}"), &query)
            .await?;
        let bytes = decode_raw(&raw.id, &raw.raw)?;
        let envelope = RawEnvelope {
            id: raw.id,
            thread_id: raw.thread_id,
            labels: raw.label_ids,
            snippet: raw.snippet,
        };
        parse_message(envelope, &bytes, Utc::now())
    }

    async fn current_history_id(&self, access_token: &str) -> Result<Option<String>, MailError> {
        let profile: Profile = self.get(access_token, "/profile", &[]).await?;
        Ok(profile.history_id)
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn refresh_access_token(&self, account: &Account) -> Result<AccessToken, MailError> {
        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| MailError::AuthFailed {
                account: account.email.clone(),
                reason: "no refresh token stored".into(),
            })?;

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::AuthFailed {
                account: account.email.clone(),
                reason: format!("token refresh failed ({status}): {body}"),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::Http(format!("parse token response: {e}")))?;

        info!(account = %account.email, "Refreshed access token");
        Ok(AccessToken {
            token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    async fn fetch_new(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        max: usize,
    ) -> Result<FetchBatch, MailError> {
        // Read before listing so mail arriving mid-fetch stays after the cursor.
        let head = self.current_history_id(access_token).await?;

        let (ids, incremental, resume_from) = match cursor {
            Some(cursor) => match self.list_history(access_token, cursor, max).await {
                Ok(listing) => (listing.ids, true, listing.resume_from),
                Err(MailError::HistoryExpired { cursor }) => {
                    warn!(cursor = %cursor, "History cursor expired, doing full fetch");
                    (self.list_unread(access_token, max).await?, false, None)
                }
                Err(e) => return Err(e),
            },
            None => (self.list_unread(access_token, max).await?, false, None),
        };

        let mut emails = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.get_message(access_token, id).await {
                // History lists every added message; only unread ones matter.
                Ok(email) if incremental && !email.labels.iter().any(|l| l == UNREAD) => {
                    debug!(id = %id, "Skipping already-read message");
                }
                Ok(email) => emails.push(email),
                Err(e @ (MailError::AuthFailed { .. } | MailError::RateLimited)) => return Err(e),
                Err(e) => warn!(id = %id, error = %e, "Failed to fetch message"),
            }
        }

        let cursor = match resume_from {
            Some(resume) => {
                info!(cursor = %resume, max, "Batch capped, resuming from last listed record");
                Some(resume)
            }
            None => head,
        };
        debug!(fetched = emails.len(), listed = ids.len(), "Fetched mailbox batch");
        Ok(FetchBatch { emails, cursor })
    }
}
