//! Importance scoring: one LLM call per message, plus whitelist boost and
//! learned adjustments.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::FetchedEmail;
use crate::pipeline::feedback;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::Database;

/// Flat boost for whitelisted senders.
pub const WHITELIST_BOOST: f64 = 0.15;

/// Score used when the model's answer has no score.
const DEFAULT_SCORE: f64 = 0.5;

const SCORING_MAX_TOKENS: u32 = 300;
const SCORING_TEMPERATURE: f32 = 0.1;
const BODY_PREVIEW_CHARS: usize = 500;

pub const PARSE_FAILED_REASON: &str = "Analysis parsing failed - manual review recommended";

const SYSTEM_PROMPT: &str = r#"You are an email importance analyzer. Your job is to determine if an email requires immediate attention and should trigger a push notification to the user's phone.

Analyze the email and return a JSON response with:
- score: float from 0.0 (spam/unimportant) to 1.0 (critical/urgent)
- reason: brief explanation (1-2 sentences max)
- category: one of 'urgent', 'important', 'normal', 'low'
- suggested_action: what the recipient should do
- deadline: object with "date" (ISO format YYYY-MM-DD) and "text" (human description) OR null if no deadline

HIGH IMPORTANCE (0.7+), notify immediately:
- Financial alerts: fraud alerts, unusual activity, payment due
- Government/legal: tax deadlines, legal notices, court documents
- Security alerts: password resets the user didn't initiate, logins from new devices
- Account deactivation warnings
- Health/medical: appointment reminders, test results, urgent medical info
- Work emergencies from known colleagues
- Time-sensitive deadlines with real consequences
- Family/personal emergencies

MEDIUM IMPORTANCE (0.4-0.7):
- Non-urgent work email from colleagues
- Appointment confirmations
- Shipping/delivery updates for important packages
- Account statements

LOW IMPORTANCE (0.3 or below), do not notify:
- Marketing/promotional email
- Newsletters and digests
- Social media notifications
- Automated receipts (unless large amounts over $500)
- General announcements
- Cold outreach/sales email
- Subscription updates

DEADLINE DETECTION:
- Look for phrases like "due by", "deadline", "must respond by", "expires on", "by [date]"
- Return deadline as {"date": "2026-02-15", "text": "Tax filing due Feb 15"} or null if none

Be conservative: only high scores (0.7+) trigger phone notifications that interrupt the user.

Respond ONLY with valid JSON, no other text or markdown formatting."#;

/// Outcome of scoring one message.
#[derive(Debug, Clone, Serialize)]
pub struct ImportanceAnalysis {
    /// Final score in [0, 1].
    pub score: f64,
    pub reason: String,
    pub category: String,
    pub suggested_action: String,
    pub deadline_date: Option<NaiveDate>,
    pub deadline_text: Option<String>,
    /// The model's answer could not be parsed; score is the fallback.
    pub parse_failed: bool,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    score: Option<f64>,
    reason: Option<String>,
    category: Option<String>,
    suggested_action: Option<String>,
    deadline: Option<RawDeadline>,
}

#[derive(Debug, Deserialize)]
struct RawDeadline {
    date: Option<String>,
    text: Option<String>,
}

/// Scores messages with an LLM.
pub struct Scorer {
    llm: Arc<dyn LlmProvider>,
    db: Arc<dyn Database>,
    retry: RetryPolicy,
}

impl Scorer {
    pub fn new(llm: Arc<dyn LlmProvider>, db: Arc<dyn Database>) -> Self {
        Self {
            llm,
            db,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Score one message. LLM failures (after retries) are errors; an
    /// unparseable answer falls back to a neutral score.
    pub async fn score(
        &self,
        email: &FetchedEmail,
        whitelisted: bool,
    ) -> Result<ImportanceAnalysis, PipelineError> {
        let messages = build_messages(email, whitelisted);
        let response = with_retry(self.retry, "score_email", || {
            let request = CompletionRequest::new(messages.clone())
                .with_max_tokens(SCORING_MAX_TOKENS)
                .with_temperature(SCORING_TEMPERATURE);
            self.llm.complete(request)
        })
        .await?;

        let mut analysis = parse_analysis(&response.content, whitelisted);
        if analysis.parse_failed {
            warn!(
                id = %email.message_id,
                response = %truncate_for_log(&response.content),
                "Failed to parse scoring response"
            );
            return Ok(analysis);
        }

        let adjustment = match feedback::total_adjustment(self.db.as_ref(), &email.sender_email).await
        {
            Ok(adj) => adj,
            Err(e) => {
                warn!(sender = %email.sender_email, error = %e, "Learned adjustment lookup failed");
                0.0
            }
        };
        if adjustment != 0.0 {
            let before = analysis.score;
            analysis.score = apply_adjustment(before, adjustment);
            info!(
                sender = %email.sender_email,
                adjustment,
                before,
                after = analysis.score,
                "Applied learned adjustment"
            );
        }

        Ok(analysis)
    }
}

/// System and user prompt for one message.
pub fn build_messages(email: &FetchedEmail, whitelisted: bool) -> Vec<ChatMessage> {
    let sender = match email.sender_name.as_deref() {
        Some(name) if !name.is_empty() => format!("{name} <{}>", email.sender_email),
        _ => email.sender_email.clone(),
    };
    let whitelist_note = if whitelisted {
        "\n\nNOTE: This sender is on the user's trusted whitelist - they have marked this sender as important."
    } else {
        ""
    };
    let preview: String = email.body_text.chars().take(BODY_PREVIEW_CHARS).collect();

    let user = format!(
        "Analyze this email for importance:\n\n\
         From: {sender}{whitelist_note}\n\
         Subject: {subject}\n\n\
         Body preview:\n{preview}\n\n\
         Return JSON with score (0.0-1.0), reason, category, suggested_action, and deadline (or null).",
        subject = email.subject,
    );

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Parse the model's answer and apply the whitelist boost.
pub fn parse_analysis(text: &str, whitelisted: bool) -> ImportanceAnalysis {
    let json = extract_json_object(text);
    let raw: RawAnalysis = match serde_json::from_str(&json) {
        Ok(raw) => raw,
        Err(_) => return fallback_analysis(whitelisted),
    };

    let base = raw.score.unwrap_or(DEFAULT_SCORE).clamp(0.0, 1.0);
    let score = if whitelisted {
        (base + WHITELIST_BOOST).min(1.0)
    } else {
        base
    };

    let (deadline_date, deadline_text) = match raw.deadline {
        Some(d) => (
            d.date
                .as_deref()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()),
            d.text.filter(|t| !t.trim().is_empty()),
        ),
        None => (None, None),
    };

    ImportanceAnalysis {
        score,
        reason: raw
            .reason
            .unwrap_or_else(|| "Unable to determine importance".into()),
        category: raw.category.unwrap_or_else(|| "normal".into()),
        suggested_action: raw
            .suggested_action
            .unwrap_or_else(|| "Review when convenient".into()),
        deadline_date,
        deadline_text,
        parse_failed: false,
    }
}

/// Neutral analysis for answers that could not be parsed.
pub fn fallback_analysis(whitelisted: bool) -> ImportanceAnalysis {
    ImportanceAnalysis {
        score: if whitelisted { 0.65 } else { DEFAULT_SCORE },
        reason: PARSE_FAILED_REASON.into(),
        category: "normal".into(),
        suggested_action: "Manual review recommended".into(),
        deadline_date: None,
        deadline_text: None,
        parse_failed: true,
    }
}

/// Add a learned adjustment, keeping the score in [0, 1].
pub fn apply_adjustment(score: f64, adjustment: f64) -> f64 {
    (score + adjustment).clamp(0.0, 1.0)
}

/// Round to two decimals, the precision scores are stored with.
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(200).collect()
}

/// Extract a JSON object from LLM output that may be wrapped in markdown
/// code fences or surrounded by prose.
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
