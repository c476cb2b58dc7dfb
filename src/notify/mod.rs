//! Push notifications.

pub mod format;
pub mod pushover;

pub use pushover::PushoverClient;

use async_trait::async_trait;

use crate::error::NotifyError;

/// Pushover priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Emergency,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        match self {
            Priority::Lowest => -2,
            Priority::Low => -1,
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Emergency => 2,
        }
    }
}

/// Notification sounds we use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    Pushover,
    Incoming,
    Siren,
    None,
}

impl Sound {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sound::Pushover => "pushover",
            Sound::Incoming => "incoming",
            Sound::Siren => "siren",
            Sound::None => "none",
        }
    }
}

/// A message to push.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub sound: Sound,
    /// Message body contains HTML markup.
    pub html: bool,
    pub url: Option<String>,
    pub url_title: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: Priority::Normal,
            sound: Sound::Pushover,
            html: false,
            url: None,
            url_title: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority, sound: Sound) -> Self {
        self.priority = priority;
        self.sound = sound;
        self
    }

    pub fn html(mut self) -> Self {
        self.html = true;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>, title: Option<String>) -> Self {
        self.url = Some(url.into());
        self.url_title = title;
        self
    }
}

/// Accepted delivery.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    /// Provider-side request id or emergency receipt.
    pub receipt: Option<String>,
}

/// A push notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<Delivery, NotifyError>;
}
