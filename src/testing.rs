//! Test doubles shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{LlmError, MailError, NotifyError};
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::mail::{AccessToken, FetchBatch, FetchedEmail, MailSource};
use crate::notify::{Delivery, Notification, Notifier};
use crate::store::Account;

/// LLM that answers from a queue, repeating the last answer when drained.
pub struct StubLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<String>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl StubLlm {
    pub fn replying(text: &str) -> Self {
        Self::sequence(vec![Ok(text.to_string())])
    }

    pub fn sequence(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        let content = match next {
            Some(Ok(text)) => {
                *self.last.lock().unwrap() = Some(text.clone());
                text
            }
            Some(Err(e)) => return Err(e),
            None => self.last.lock().unwrap().clone().unwrap_or_default(),
        };
        Ok(CompletionResponse {
            content,
            input_tokens: 100,
            output_tokens: 50,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// LLM returning a score keyed by subject: subjects containing a key get its JSON.
pub struct SubjectLlm {
    pub by_subject: Vec<(String, String)>,
    pub fail_subjects: Vec<String>,
}

#[async_trait]
impl LlmProvider for SubjectLlm {
    fn model_name(&self) -> &str {
        "subject-stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if self.fail_subjects.iter().any(|s| prompt.contains(s.as_str())) {
            return Err(LlmError::AuthFailed {
                provider: "stub".into(),
            });
        }
        let content = self
            .by_subject
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, json)| json.clone())
            .unwrap_or_else(|| r#"{"score": 0.1, "reason": "noise", "category": "low"}"#.into());
        Ok(CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Mailbox serving canned batches per access token.
#[derive(Default)]
pub struct StubMail {
    pub batches: Mutex<HashMap<String, VecDeque<Result<FetchBatch, MailError>>>>,
    pub cursors_seen: Mutex<Vec<Option<String>>>,
    pub refreshed: Mutex<Vec<String>>,
}

impl StubMail {
    pub fn push(&self, access_token: &str, batch: Result<FetchBatch, MailError>) {
        self.batches
            .lock()
            .unwrap()
            .entry(access_token.to_string())
            .or_default()
            .push_back(batch);
    }
}

#[async_trait]
impl MailSource for StubMail {
    async fn refresh_access_token(&self, account: &Account) -> Result<AccessToken, MailError> {
        self.refreshed.lock().unwrap().push(account.email.clone());
        Ok(AccessToken {
            token: format!("fresh-{}", account.email),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        })
    }

    async fn fetch_new(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        _max: usize,
    ) -> Result<FetchBatch, MailError> {
        self.cursors_seen
            .lock()
            .unwrap()
            .push(cursor.map(String::from));
        self.batches
            .lock()
            .unwrap()
            .get_mut(access_token)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Ok(FetchBatch::default()))
    }
}

/// Notifier that records what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail_with: Mutex<Option<String>>,
}

impl RecordingNotifier {
    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Mutex::new(Some(reason.to_string())),
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<Delivery, NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        match self.fail_with.lock().unwrap().clone() {
            Some(reason) => Err(NotifyError::Rejected {
                name: "recording".into(),
                reason,
            }),
            None => Ok(Delivery {
                receipt: Some("req-1".into()),
            }),
        }
    }
}

/// A fetched email with sensible defaults.
pub fn fetched(id: &str, sender: &str, subject: &str) -> FetchedEmail {
    FetchedEmail {
        message_id: id.into(),
        thread_id: Some(format!("t-{id}")),
        sender_email: sender.into(),
        sender_name: None,
        subject: subject.into(),
        snippet: String::new(),
        body_text: format!("Body of {subject}"),
        received_at: chrono::Utc::now(),
        labels: vec!["INBOX".into(), "UNREAD".into()],
    }
}
