//! Whitelist and blacklist input handling.
//!
//! Free-form input ("everyone at acme.com and bob@x.io") goes through the
//! LLM first. When no model is configured, or its answer yields nothing
//! usable, a regex pass pulls out addresses and domain names instead.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::{Database, EntryType, ListKind, RuleChange, SenderRule};

const PARSER_MAX_TOKENS: u32 = 500;

const PARSER_PROMPT: &str = r#"You extract email addresses and domains from user input for a sender list.

Return a JSON array of objects with:
- "type": "email" for a specific address, "domain" for an entire domain
- "value": the address or domain, lowercase, domains without a leading @

Rules:
- Anything containing @ with a local part is an email
- A bare domain, "@domain.com" or "emails from domain.com" is a domain
- Extract every address and domain mentioned, ignore filler words

Examples:
Input: "@bi-scs.com or sonya@topwellzx.com"
Output: [{"type": "domain", "value": "bi-scs.com"}, {"type": "email", "value": "sonya@topwellzx.com"}]

Input: "trust all mail from amazon.com, ups.com, fedex.com"
Output: [{"type": "domain", "value": "amazon.com"}, {"type": "domain", "value": "ups.com"}, {"type": "domain", "value": "fedex.com"}]

Respond ONLY with the JSON array, no other text."#;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}").unwrap()
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@?\b[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}\b")
        .unwrap()
});

/// One entry extracted from user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEntry {
    pub entry_type: EntryType,
    pub value: String,
}

/// Clean up a raw value for the given type. Returns `None` when it is not
/// a valid entry of that type.
pub fn normalize_entry(entry_type: EntryType, raw: &str) -> Option<ParsedEntry> {
    let mut value = raw.trim().to_lowercase();
    match entry_type {
        EntryType::Domain => {
            value = value.trim_start_matches('@').to_string();
            if value.is_empty() || value.contains('@') || !value.contains('.') {
                return None;
            }
        }
        EntryType::Email => {
            let (local, domain) = value.split_once('@')?;
            if local.is_empty() || domain.is_empty() {
                return None;
            }
        }
    }
    Some(ParsedEntry { entry_type, value })
}

fn push_unique(entries: &mut Vec<ParsedEntry>, entry: ParsedEntry) {
    if !entries.contains(&entry) {
        entries.push(entry);
    }
}

/// Extract addresses first, then domain names from whatever text remains.
pub fn parse_with_regex(input: &str) -> Vec<ParsedEntry> {
    let mut entries = Vec::new();

    for m in EMAIL_RE.find_iter(input) {
        if let Some(entry) = normalize_entry(EntryType::Email, m.as_str()) {
            push_unique(&mut entries, entry);
        }
    }

    let remainder = EMAIL_RE.replace_all(input, " ");
    for m in DOMAIN_RE.find_iter(&remainder) {
        if let Some(entry) = normalize_entry(EntryType::Domain, m.as_str()) {
            push_unique(&mut entries, entry);
        }
    }

    entries
}

/// Split explicit bulk input on commas and newlines.
pub fn split_bulk(input: &str, entry_type: EntryType) -> Vec<ParsedEntry> {
    let mut entries = Vec::new();
    for raw in input.split([',', '\n', '\r']) {
        if raw.trim().is_empty() {
            continue;
        }
        match normalize_entry(entry_type, raw) {
            Some(entry) => push_unique(&mut entries, entry),
            None => debug!(value = raw.trim(), entry_type = entry_type.as_str(), "Dropping invalid bulk entry"),
        }
    }
    entries
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default)]
    entry_type: String,
    #[serde(default)]
    value: String,
}

/// Read the model's JSON array. Invalid items are dropped; `None` means
/// the answer was not a JSON array at all.
pub fn parse_llm_entries(text: &str) -> Option<Vec<ParsedEntry>> {
    let trimmed = text.trim();
    let json = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => return None,
    };
    let raw: Vec<RawEntry> = serde_json::from_str(json).ok()?;

    let mut entries = Vec::new();
    for item in raw {
        let Ok(entry_type) = item.entry_type.parse::<EntryType>() else {
            warn!(entry_type = %item.entry_type, "Ignoring entry with invalid type");
            continue;
        };
        match normalize_entry(entry_type, &item.value) {
            Some(entry) => push_unique(&mut entries, entry),
            None => warn!(value = %item.value, "Ignoring invalid entry"),
        }
    }
    Some(entries)
}

/// Turns free-form input into list entries.
pub struct SenderListParser {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl SenderListParser {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    pub async fn parse(&self, input: &str) -> Vec<ParsedEntry> {
        if input.trim().is_empty() {
            return Vec::new();
        }

        if let Some(llm) = &self.llm {
            let request = CompletionRequest::new(vec![
                ChatMessage::system(PARSER_PROMPT),
                ChatMessage::user(input),
            ])
            .with_max_tokens(PARSER_MAX_TOKENS)
            .with_temperature(0.0);

            match llm.complete(request).await {
                Ok(response) => match parse_llm_entries(&response.content) {
                    Some(entries) if !entries.is_empty() => {
                        info!(input, count = entries.len(), "Parsed sender list input");
                        return entries;
                    }
                    _ => warn!("Model returned no usable entries, using regex parser"),
                },
                Err(e) => warn!(error = %e, "Sender list parsing failed, using regex parser"),
            }
        }

        parse_with_regex(input)
    }
}

/// What happened when adding a batch of entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddSummary {
    pub added: usize,
    pub reactivated: usize,
    pub skipped: usize,
    pub entries: Vec<SenderRule>,
}

pub async fn add_entries(
    db: &dyn Database,
    list: ListKind,
    entries: &[ParsedEntry],
    notes: Option<&str>,
) -> Result<AddSummary, DatabaseError> {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());
    let mut summary = AddSummary::default();

    for entry in entries {
        let (rule, change) = db
            .add_sender_rule(list, entry.entry_type, &entry.value, notes)
            .await?;
        match change {
            RuleChange::Created => summary.added += 1,
            RuleChange::Reactivated => summary.reactivated += 1,
            RuleChange::AlreadyPresent => {
                summary.skipped += 1;
                continue;
            }
        }
        info!(%list, entry_type = rule.entry_type.as_str(), value = %rule.value, "Sender list entry added");
        summary.entries.push(rule);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::store::LibSqlBackend;
    use crate::testing::StubLlm;

    fn email(v: &str) -> ParsedEntry {
        ParsedEntry {
            entry_type: EntryType::Email,
            value: v.into(),
        }
    }

    fn domain(v: &str) -> ParsedEntry {
        ParsedEntry {
            entry_type: EntryType::Domain,
            value: v.into(),
        }
    }

    #[test]
    fn normalizes_values() {
        assert_eq!(normalize_entry(EntryType::Domain, " @Acme.COM "), Some(domain("acme.com")));
        assert_eq!(normalize_entry(EntryType::Email, "Bob@X.io"), Some(email("bob@x.io")));
        assert_eq!(normalize_entry(EntryType::Email, "acme.com"), None);
        assert_eq!(normalize_entry(EntryType::Email, "@acme.com"), None);
        assert_eq!(normalize_entry(EntryType::Domain, "bob@x.io"), None);
        assert_eq!(normalize_entry(EntryType::Domain, "   "), None);
    }

    #[test]
    fn regex_extracts_emails_and_domains() {
        let entries = parse_with_regex("everyone at @bi-scs.com and Sonya@TopWellzx.com, plus ups.com");
        assert_eq!(
            entries,
            vec![email("sonya@topwellzx.com"), domain("bi-scs.com"), domain("ups.com")]
        );
    }

    #[test]
    fn regex_ignores_plain_words() {
        assert!(parse_with_regex("please add my boss").is_empty());
    }

    #[test]
    fn bulk_split_drops_empties_and_invalid() {
        let entries = split_bulk("a@x.com,\n b@y.org ,, nope\nA@x.com", EntryType::Email);
        assert_eq!(entries, vec![email("a@x.com"), email("b@y.org")]);
    }

    #[test]
    fn llm_entries_are_validated() {
        let text = r#"Here you go:
```json
[{"type": "domain", "value": "@Acme.com"}, {"type": "phone", "value": "555"}, {"type": "email", "value": "nobody"}, {"type": "email", "value": "jane@corp.org"}]
```"#;
        assert_eq!(
            parse_llm_entries(text).unwrap(),
            vec![domain("acme.com"), email("jane@corp.org")]
        );
        assert!(parse_llm_entries("I cannot help with that").is_none());
    }

    #[tokio::test]
    async fn parser_prefers_model_answer() {
        let llm = Arc::new(StubLlm::replying(r#"[{"type": "domain", "value": "acme.com"}]"#));
        let parser = SenderListParser::new(Some(llm.clone()));
        assert_eq!(parser.parse("all of acme corp").await, vec![domain("acme.com")]);
        assert_eq!(llm.request_count(), 1);
    }

    #[tokio::test]
    async fn parser_falls_back_to_regex() {
        let llm = Arc::new(StubLlm::sequence(vec![Err(LlmError::AuthFailed {
            provider: "stub".into(),
        })]));
        let parser = SenderListParser::new(Some(llm));
        assert_eq!(parser.parse("bob@x.io").await, vec![email("bob@x.io")]);

        let empty = SenderListParser::new(Some(Arc::new(StubLlm::replying("[]"))));
        assert_eq!(empty.parse("acme.com").await, vec![domain("acme.com")]);

        let none = SenderListParser::new(None);
        assert_eq!(none.parse("acme.com").await, vec![domain("acme.com")]);
        assert!(none.parse("  ").await.is_empty());
    }

    #[tokio::test]
    async fn add_entries_counts_changes() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let first = add_entries(&db, ListKind::Whitelist, &[email("a@x.com"), domain("x.com")], Some(" boss "))
            .await
            .unwrap();
        assert_eq!((first.added, first.reactivated, first.skipped), (2, 0, 0));
        assert_eq!(first.entries[0].notes.as_deref(), Some("boss"));

        let id = first.entries[1].id;
        assert!(db.deactivate_sender_rule(ListKind::Whitelist, id).await.unwrap());

        let second = add_entries(&db, ListKind::Whitelist, &[email("a@x.com"), domain("x.com")], None)
            .await
            .unwrap();
        assert_eq!((second.added, second.reactivated, second.skipped), (0, 1, 1));
        assert_eq!(second.entries[0].id, id);

        let blacklist = add_entries(&db, ListKind::Blacklist, &[domain("x.com")], None)
            .await
            .unwrap();
        assert_eq!(blacklist.added, 1);
    }
}
