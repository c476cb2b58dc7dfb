//! Pushover API client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::NotifyError;
use crate::notify::{Delivery, Notification, Notifier, Priority};

pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

const NAME: &str = "pushover";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_TITLE: usize = 250;
const MAX_MESSAGE: usize = 1024;
const MAX_URL: usize = 512;
const MAX_URL_TITLE: usize = 100;

/// Emergency notifications repeat every `retry` seconds until acknowledged
/// or `expire` seconds have passed.
const EMERGENCY_RETRY_SECS: u32 = 60;
const EMERGENCY_EXPIRE_SECS: u32 = 3600;

#[derive(Debug, Deserialize)]
struct PushoverResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

pub struct PushoverClient {
    client: reqwest::Client,
    user_key: SecretString,
    api_token: SecretString,
    url: String,
}

impl PushoverClient {
    pub fn new(user_key: SecretString, api_token: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            user_key,
            api_token,
            url: PUSHOVER_API_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Form body for a notification, with Pushover's length limits applied.
    pub fn form_fields(&self, notification: &Notification) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("token", self.api_token.expose_secret().to_string()),
            ("user", self.user_key.expose_secret().to_string()),
            ("title", cap(&notification.title, MAX_TITLE)),
            ("message", cap(&notification.message, MAX_MESSAGE)),
            ("priority", notification.priority.as_i32().to_string()),
            ("sound", notification.sound.as_str().to_string()),
        ];
        if notification.html {
            fields.push(("html", "1".into()));
        }
        if let Some(url) = &notification.url {
            fields.push(("url", cap(url, MAX_URL)));
            if let Some(title) = &notification.url_title {
                fields.push(("url_title", cap(title, MAX_URL_TITLE)));
            }
        }
        if notification.priority == Priority::Emergency {
            fields.push(("retry", EMERGENCY_RETRY_SECS.to_string()));
            fields.push(("expire", EMERGENCY_EXPIRE_SECS.to_string()));
        }
        fields
    }
}

fn cap(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl Notifier for PushoverClient {
    fn name(&self) -> &str {
        NAME
    }

    async fn send(&self, notification: &Notification) -> Result<Delivery, NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .form(&self.form_fields(notification))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Http("Request timed out".into())
                } else {
                    NotifyError::Http(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(NotifyError::RateLimited { name: NAME.into() });
        }
        if status >= 500 {
            return Err(NotifyError::ServerError {
                name: NAME.into(),
                status,
            });
        }

        let body: Option<PushoverResponse> = response.json().await.ok();
        match body {
            Some(body) if status == 200 && body.status == 1 => {
                debug!(request = ?body.request, "Pushover accepted notification");
                Ok(Delivery {
                    receipt: body.receipt.or(body.request),
                })
            }
            Some(body) if !body.errors.is_empty() => {
                let reason = body.errors.join(", ");
                error!(status, reason = %reason, "Pushover rejected notification");
                Err(NotifyError::Rejected {
                    name: NAME.into(),
                    reason,
                })
            }
            _ => {
                error!(status, "Pushover rejected notification");
                Err(NotifyError::Rejected {
                    name: NAME.into(),
                    reason: format!("HTTP {status}"),
                })
            }
        }
    }
}
