//! Shared doubles and server setup for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpListener;

use email_alerter::api;
use email_alerter::config::AppConfig;
use email_alerter::error::{LlmError, MailError, NotifyError};
use email_alerter::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use email_alerter::mail::{AccessToken, FetchBatch, FetchedEmail, MailSource};
use email_alerter::notify::{Delivery, Notification, Notifier};
use email_alerter::retry::RetryPolicy;
use email_alerter::service::Services;
use email_alerter::store::{Account, Database, LibSqlBackend};

/// Scores by subject keyword; anything unknown is low importance.
pub struct KeywordLlm {
    pub scores: Vec<(&'static str, f64)>,
}

#[async_trait]
impl LlmProvider for KeywordLlm {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt: String = request.messages.iter().map(|m| m.content.as_str()).collect();
        let score = self
            .scores
            .iter()
            .find(|(k, _)| prompt.contains(k))
            .map(|(_, s)| *s)
            .unwrap_or(0.1);
        Ok(CompletionResponse {
            content: format!(r#"{{"score": {score}, "reason": "keyword", "category": "test"}}"#),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Serves one queued batch per fetch, then empty batches.
#[derive(Default)]
pub struct QueuedMail {
    pub batches: Mutex<VecDeque<FetchBatch>>,
}

impl QueuedMail {
    pub fn with(batch: FetchBatch) -> Self {
        Self {
            batches: Mutex::new(VecDeque::from([batch])),
        }
    }
}

#[async_trait]
impl MailSource for QueuedMail {
    async fn refresh_access_token(&self, _account: &Account) -> Result<AccessToken, MailError> {
        Ok(AccessToken {
            token: "access".into(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    async fn fetch_new(
        &self,
        _access_token: &str,
        _cursor: Option<&str>,
        _max: usize,
    ) -> Result<FetchBatch, MailError> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub delay: Option<Duration>,
}

impl CapturingNotifier {
    /// Takes `delay` to deliver each notification.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    fn name(&self) -> &str {
        "capturing"
    }

    async fn send(&self, notification: &Notification) -> Result<Delivery, NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(Delivery {
            receipt: Some("receipt-1".into()),
        })
    }
}

pub fn email(id: &str, sender: &str, subject: &str) -> FetchedEmail {
    FetchedEmail {
        message_id: id.into(),
        thread_id: None,
        sender_email: sender.into(),
        sender_name: None,
        subject: subject.into(),
        snippet: String::new(),
        body_text: format!("About: {subject}"),
        received_at: Utc::now(),
        labels: vec!["INBOX".into(), "UNREAD".into()],
    }
}

/// Configuration with every credential present.
pub fn full_config() -> AppConfig {
    AppConfig::from_lookup(|key| {
        let value = match key {
            "DATABASE_URL" => ":memory:",
            "GOOGLE_CLIENT_ID" => "cid",
            "GOOGLE_CLIENT_SECRET" => "csecret",
            "ANTHROPIC_API_KEY" => "sk-ant-test",
            "PUSHOVER_USER_KEY" => "ukey",
            "PUSHOVER_API_TOKEN" => "atoken",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap()
}

pub struct TestApp {
    pub base: String,
    pub client: reqwest::Client,
    pub db: Arc<dyn Database>,
    pub notifier: Arc<CapturingNotifier>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Start the API on a random port with in-memory storage.
pub async fn spawn_app(config: AppConfig, mail: QueuedMail) -> TestApp {
    spawn_app_with_notifier(config, mail, CapturingNotifier::default()).await
}

pub async fn spawn_app_with_notifier(
    config: AppConfig,
    mail: QueuedMail,
    notifier: CapturingNotifier,
) -> TestApp {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let notifier = Arc::new(notifier);
    let llm = Arc::new(KeywordLlm {
        scores: vec![("Wire transfer", 0.92), ("Invoice", 0.6)],
    });

    let services = Services::new(config, Arc::clone(&db))
        .with_llm(llm)
        .with_mail(Arc::new(mail))
        .with_notifier(notifier.clone())
        .with_retry_policy(RetryPolicy::immediate(1));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(services);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestApp {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        db,
        notifier,
    }
}
