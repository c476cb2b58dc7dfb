//! Alert and test notification content.

use chrono::NaiveDate;

use crate::notify::{Notification, Priority, Sound};
use crate::store::ProcessedEmail;

const TITLE_SENDER_CHARS: usize = 40;
const SUBJECT_CHARS: usize = 200;

/// Truncate to at most `max` characters, appending "..." when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// Priority and sound for an alert with this score.
pub fn priority_for_score(score: f64) -> (Priority, Sound) {
    if score >= 0.9 {
        (Priority::High, Sound::Siren)
    } else if score >= 0.8 {
        (Priority::High, Sound::Incoming)
    } else {
        (Priority::Normal, Sound::Pushover)
    }
}

/// Deadline line relative to `today`.
pub fn deadline_warning(date: NaiveDate, text: &str, today: NaiveDate) -> String {
    let days = (date - today).num_days();
    match days {
        d if d < 0 => format!("<b>OVERDUE:</b> {text} ({} days ago!)", -d),
        0 => format!("<b>DUE TODAY:</b> {text}"),
        1..=3 => format!("<b>DEADLINE:</b> {text} ({days} days!)"),
        _ => format!("<b>Deadline:</b> {text} ({days} days)"),
    }
}

/// Immediate alert for an important email. `score` is the unrounded model
/// score; the stored value is rounded and must not pick the priority.
pub fn important_email_alert(
    email: &ProcessedEmail,
    score: f64,
    account_email: &str,
    today: NaiveDate,
) -> Notification {
    let (priority, sound) = priority_for_score(score);
    let title = format!(
        "Important: {}",
        truncate(email.sender_display(), TITLE_SENDER_CHARS)
    );

    let subject: String = email.subject.chars().take(SUBJECT_CHARS).collect();
    let reason = email.importance_reason.as_deref().unwrap_or("No reason given");
    let mut message = format!(
        "<b>Subject:</b> {subject}\n\n<b>Account:</b> {account_email}\n\n<b>Why important:</b> {reason}"
    );

    if let (Some(date), Some(text)) = (email.deadline_date, email.deadline_text.as_deref()) {
        message.push_str("\n\n");
        message.push_str(&deadline_warning(date, text, today));
    }

    Notification::new(title, message)
        .with_priority(priority, sound)
        .html()
}

/// Notification used to verify Pushover credentials.
pub fn test_notification() -> Notification {
    Notification::new(
        "Email Alerter Test",
        "If you received this, your Pushover configuration is working correctly!",
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn email(score: f64, sender_name: Option<&str>) -> ProcessedEmail {
        ProcessedEmail {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            message_id: "m1".into(),
            thread_id: None,
            sender_email: "boss@acme.com".into(),
            sender_name: sender_name.map(String::from),
            subject: "Budget review".into(),
            received_at: Utc::now(),
            is_whitelisted: false,
            importance_score: score,
            importance_reason: Some("Direct request from manager".into()),
            category: Some("important".into()),
            notification_sent: false,
            notification_sent_at: None,
            deadline_date: None,
            deadline_text: None,
            digest_eligible: false,
            digest_sent: false,
            digest_sent_at: None,
            processed_at: Utc::now(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn priority_boundaries() {
        assert_eq!(priority_for_score(0.9), (Priority::High, Sound::Siren));
        assert_eq!(priority_for_score(0.89), (Priority::High, Sound::Incoming));
        assert_eq!(priority_for_score(0.8), (Priority::High, Sound::Incoming));
        assert_eq!(priority_for_score(0.79), (Priority::Normal, Sound::Pushover));
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("short", 40), "short");
        assert_eq!(truncate("ééééé", 3), "ééé...");
    }

    #[test]
    fn deadline_buckets() {
        let today = day(10);
        assert_eq!(
            deadline_warning(day(8), "invoice", today),
            "<b>OVERDUE:</b> invoice (2 days ago!)"
        );
        assert_eq!(deadline_warning(day(10), "invoice", today), "<b>DUE TODAY:</b> invoice");
        assert_eq!(
            deadline_warning(day(13), "invoice", today),
            "<b>DEADLINE:</b> invoice (3 days!)"
        );
        assert_eq!(
            deadline_warning(day(20), "invoice", today),
            "<b>Deadline:</b> invoice (10 days)"
        );
    }

    #[test]
    fn alert_uses_name_and_html() {
        let n = important_email_alert(&email(0.95, Some("Jane Boss")), 0.95, "me@example.com", day(1));
        assert_eq!(n.title, "Important: Jane Boss");
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.sound, Sound::Siren);
        assert!(n.html);
        assert!(n.message.contains("<b>Subject:</b> Budget review"));
        assert!(n.message.contains("<b>Account:</b> me@example.com"));
        assert!(!n.message.contains("Deadline"));
    }

    #[test]
    fn alert_falls_back_to_address_and_adds_deadline() {
        let mut e = email(0.75, None);
        e.deadline_date = Some(day(2));
        e.deadline_text = Some("sign contract".into());
        let n = important_email_alert(&e, 0.75, "me@example.com", day(1));
        assert_eq!(n.title, "Important: boss@acme.com");
        assert_eq!(n.priority, Priority::Normal);
        assert!(n.message.ends_with("<b>DEADLINE:</b> sign contract (1 days!)"));
    }

    #[test]
    fn priority_follows_unrounded_score() {
        // 0.896 is stored as 0.90 but has not reached the siren tier.
        let n = important_email_alert(&email(0.9, None), 0.896, "me@example.com", day(1));
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.sound, Sound::Incoming);
    }

    #[test]
    fn long_sender_is_truncated_in_title() {
        let name = "A".repeat(60);
        let n = important_email_alert(&email(0.7, Some(&name)), 0.7, "me@example.com", day(1));
        assert_eq!(n.title, format!("Important: {}...", "A".repeat(40)));
    }
}
