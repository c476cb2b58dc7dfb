//! Raw RFC 822 message parsing.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use crate::error::MailError;
use crate::mail::FetchedEmail;

/// Longest body kept for scoring, in characters.
pub const MAX_BODY_CHARS: usize = 2000;

const NO_SUBJECT: &str = "(No Subject)";

/// Gmail metadata that travels next to the raw bytes.
#[derive(Debug, Clone, Default)]
pub struct RawEnvelope {
    pub id: String,
    pub thread_id: Option<String>,
    pub labels: Vec<String>,
    pub snippet: String,
}

/// Decode Gmail's base64url `raw` field.
pub fn decode_raw(id: &str, raw: &str) -> Result<Vec<u8>, MailError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect();
    URL_SAFE_NO_PAD
        .decode(cleaned.as_bytes())
        .map_err(|e| MailError::Parse {
            id: id.to_string(),
            reason: format!("base64: {e}"),
        })
}

/// Parse raw message bytes into a [`FetchedEmail`].
///
/// Missing Date headers fall back to `now`.
pub fn parse_message(
    envelope: RawEnvelope,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<FetchedEmail, MailError> {
    let parsed = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| MailError::Parse {
            id: envelope.id.clone(),
            reason: "not an RFC 822 message".into(),
        })?;

    let from = parsed.from().and_then(|addr| addr.first());
    let sender_email = from
        .and_then(|a| a.address())
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_else(|| "unknown".into());
    let sender_name = from
        .and_then(|a| a.name())
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty());

    let subject = parsed
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_string();

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(now);

    Ok(FetchedEmail {
        message_id: envelope.id,
        thread_id: envelope.thread_id,
        sender_email,
        sender_name,
        subject,
        snippet: envelope.snippet,
        body_text: cap_chars(&extract_text(&parsed), MAX_BODY_CHARS),
        received_at,
        labels: envelope.labels,
    })
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags and normalize whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
