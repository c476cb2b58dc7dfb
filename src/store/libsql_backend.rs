//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local files, in-memory databases and remote `libsql://` URLs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    Account, AccountCredentials, DigestStats, EmailStats, EntryType, FeedbackRecord,
    FeedbackStats, FeedbackType, LearnedPattern, ListKind, NotificationRecord,
    NotificationStatus, NotificationType, PatternType, ProcessedEmail, RuleChange, SenderRule,
};
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open the database named by a `DATABASE_URL` value.
    ///
    /// `libsql://`, `https://` and `http://` URLs open a remote database with
    /// `auth_token`; `:memory:` opens an in-memory one; anything else is a
    /// local file path (an optional `file:` or `sqlite://` prefix is dropped).
    pub async fn open(url: &str, auth_token: Option<&str>) -> Result<Self, DatabaseError> {
        if url.starts_with("libsql://") || url.starts_with("https://") || url.starts_with("http://")
        {
            return Self::new_remote(url, auth_token.unwrap_or_default()).await;
        }
        if url == ":memory:" {
            return Self::new_memory().await;
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("file:"))
            .unwrap_or(url);
        Self::new_local(Path::new(path)).await
    }

    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Connect to a remote libSQL server.
    pub async fn new_remote(url: &str, auth_token: &str) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open remote database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(url = %url, "Remote database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn count(&self, sql: &str, arg: libsql::Value, ctx: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![arg])
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
        first_i64(&mut rows, ctx).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format: fixed-width RFC 3339 in UTC, so that
/// string comparison in SQL matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_time(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(ts(dt)),
        None => libsql::Value::Null,
    }
}

fn flag(b: bool) -> i64 {
    i64::from(b)
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn str_to_list(s: &str) -> ListKind {
    match s {
        "blacklist" => ListKind::Blacklist,
        _ => ListKind::Whitelist,
    }
}

fn str_to_entry_type(s: &str) -> EntryType {
    s.parse().unwrap_or(EntryType::Email)
}

fn str_to_notification_type(s: &str) -> NotificationType {
    match s {
        "digest" => NotificationType::Digest,
        "test" => NotificationType::Test,
        _ => NotificationType::Alert,
    }
}

fn str_to_notification_status(s: &str) -> NotificationStatus {
    match s {
        "sent" => NotificationStatus::Sent,
        _ => NotificationStatus::Failed,
    }
}

fn str_to_pattern_type(s: &str) -> PatternType {
    match s {
        "domain" => PatternType::Domain,
        _ => PatternType::Sender,
    }
}

/// Domain part of an address, if it has one.
fn domain_of(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, d)| d).filter(|d| !d.is_empty())
}

async fn first_i64(rows: &mut libsql::Rows, ctx: &str) -> Result<i64, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("{ctx} row parse: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("{ctx}: {e}"))),
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const ACCOUNT_COLUMNS: &str = "id, email, display_name, access_token, refresh_token, token_expiry, is_active, last_check, last_history_id, created_at, updated_at";

fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let id: String = row.get(0)?;
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;
    Ok(Account {
        id: parse_uuid(&id),
        email: row.get(1)?,
        display_name: row.get(2).ok(),
        access_token: row.get(3).ok(),
        refresh_token: row.get(4).ok(),
        token_expiry: parse_optional_datetime(row.get(5).ok()),
        is_active: row.get::<i64>(6)? != 0,
        last_check: parse_optional_datetime(row.get(7).ok()),
        last_history_id: row.get(8).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const RULE_COLUMNS: &str = "id, list, entry_type, value, notes, is_active, created_at, updated_at";

fn row_to_rule(row: &libsql::Row) -> Result<SenderRule, libsql::Error> {
    let id: String = row.get(0)?;
    let list: String = row.get(1)?;
    let entry_type: String = row.get(2)?;
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;
    Ok(SenderRule {
        id: parse_uuid(&id),
        list: str_to_list(&list),
        entry_type: str_to_entry_type(&entry_type),
        value: row.get(3)?,
        notes: row.get(4).ok(),
        is_active: row.get::<i64>(5)? != 0,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const EMAIL_COLUMNS: &str = "id, account_id, message_id, thread_id, sender_email, sender_name, subject, received_at, is_whitelisted, importance_score, importance_reason, category, notification_sent, notification_sent_at, deadline_date, deadline_text, digest_eligible, digest_sent, digest_sent_at, processed_at";

/// Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<ProcessedEmail, libsql::Error> {
    let id: String = row.get(0)?;
    let account_id: String = row.get(1)?;
    let received: String = row.get(7)?;
    let deadline: Option<String> = row.get(14).ok();
    let processed: String = row.get(19)?;
    Ok(ProcessedEmail {
        id: parse_uuid(&id),
        account_id: parse_uuid(&account_id),
        message_id: row.get(2)?,
        thread_id: row.get(3).ok(),
        sender_email: row.get(4)?,
        sender_name: row.get(5).ok(),
        subject: row.get(6)?,
        received_at: parse_datetime(&received),
        is_whitelisted: row.get::<i64>(8)? != 0,
        importance_score: row.get(9)?,
        importance_reason: row.get(10).ok(),
        category: row.get(11).ok(),
        notification_sent: row.get::<i64>(12)? != 0,
        notification_sent_at: parse_optional_datetime(row.get(13).ok()),
        deadline_date: deadline.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        deadline_text: row.get(15).ok(),
        digest_eligible: row.get::<i64>(16)? != 0,
        digest_sent: row.get::<i64>(17)? != 0,
        digest_sent_at: parse_optional_datetime(row.get(18).ok()),
        processed_at: parse_datetime(&processed),
    })
}

const NOTIFICATION_COLUMNS: &str = "id, processed_email_id, notification_type, title, message, priority, status, error_message, receipt, created_at";

fn row_to_notification(row: &libsql::Row) -> Result<NotificationRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let email_id: Option<String> = row.get(1).ok();
    let kind: String = row.get(2)?;
    let status: String = row.get(6)?;
    let created: String = row.get(9)?;
    Ok(NotificationRecord {
        id: parse_uuid(&id),
        processed_email_id: email_id.map(|s| parse_uuid(&s)),
        notification_type: str_to_notification_type(&kind),
        title: row.get(3)?,
        message: row.get(4)?,
        priority: row.get::<i64>(5)? as i32,
        status: str_to_notification_status(&status),
        error_message: row.get(7).ok(),
        receipt: row.get(8).ok(),
        created_at: parse_datetime(&created),
    })
}

const PATTERN_COLUMNS: &str =
    "id, pattern_type, pattern_value, score_adjustment, feedback_count, created_at, updated_at";

fn row_to_pattern(row: &libsql::Row) -> Result<LearnedPattern, libsql::Error> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(LearnedPattern {
        id: parse_uuid(&id),
        pattern_type: str_to_pattern_type(&kind),
        pattern_value: row.get(2)?,
        score_adjustment: row.get(3)?,
        feedback_count: row.get(4)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Drain a result set through a row mapper, skipping rows that fail to parse.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    ctx: &str,
) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(Some(row)) = rows.next().await {
        match map(&row) {
            Ok(item) => out.push(item),
            Err(e) => warn!("{ctx}: skipping row: {e}"),
        }
    }
    out
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn insert_account(&self, account: &Account) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    account.id.to_string(),
                    account.email.clone(),
                    opt_text(account.display_name.as_deref()),
                    opt_text(account.access_token.as_deref()),
                    opt_text(account.refresh_token.as_deref()),
                    opt_time(account.token_expiry),
                    flag(account.is_active),
                    opt_time(account.last_check),
                    opt_text(account.last_history_id.as_deref()),
                    ts(account.created_at),
                    ts(account.updated_at),
                ],
            )
            .await
            .map_err(|e| match e.to_string() {
                msg if msg.contains("UNIQUE") => {
                    DatabaseError::Constraint(format!("account {} already exists", account.email))
                }
                msg => DatabaseError::Query(format!("insert_account: {msg}")),
            })?;

        debug!(account = %account.email, "Account inserted");
        Ok(())
    }

    async fn insert_account_within_limit(
        &self,
        account: &Account,
        max_active: usize,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT INTO accounts ({ACCOUNT_COLUMNS}) SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11 \
                     WHERE (SELECT COUNT(*) FROM accounts WHERE is_active = 1) < ?12"
                ),
                params![
                    account.id.to_string(),
                    account.email.clone(),
                    opt_text(account.display_name.as_deref()),
                    opt_text(account.access_token.as_deref()),
                    opt_text(account.refresh_token.as_deref()),
                    opt_time(account.token_expiry),
                    flag(account.is_active),
                    opt_time(account.last_check),
                    opt_text(account.last_history_id.as_deref()),
                    ts(account.created_at),
                    ts(account.updated_at),
                    max_active as i64,
                ],
            )
            .await
            .map_err(|e| match e.to_string() {
                msg if msg.contains("UNIQUE") => {
                    DatabaseError::Constraint(format!("account {} already exists", account.email))
                }
                msg => DatabaseError::Query(format!("insert_account_within_limit: {msg}")),
            })?;

        if inserted > 0 {
            debug!(account = %account.email, "Account inserted");
        }
        Ok(inserted > 0)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_account(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_account row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_account: {e}"))),
        }
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
                params![email.trim().to_lowercase()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_account_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_account(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("find_account_by_email row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_account_by_email: {e}"))),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY is_active DESC, email ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_accounts: {e}")))?;
        Ok(collect_rows(rows, row_to_account, "list_accounts").await)
    }

    async fn list_active_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_active = 1 ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_accounts: {e}")))?;
        Ok(collect_rows(rows, row_to_account, "list_active_accounts").await)
    }

    async fn count_active_accounts(&self) -> Result<usize, DatabaseError> {
        let n = self
            .count(
                "SELECT COUNT(*) FROM accounts WHERE is_active = ?1",
                libsql::Value::Integer(1),
                "count_active_accounts",
            )
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn replace_account_credentials(
        &self,
        id: Uuid,
        credentials: &AccountCredentials,
        max_active: usize,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE accounts SET display_name = ?1, access_token = ?2, refresh_token = ?3, token_expiry = ?4, is_active = 1, last_history_id = NULL, updated_at = ?5 \
                 WHERE id = ?6 AND (is_active = 1 OR (SELECT COUNT(*) FROM accounts WHERE is_active = 1) < ?7)",
                params![
                    opt_text(credentials.display_name.as_deref()),
                    opt_text(credentials.access_token.as_deref()),
                    credentials.refresh_token.clone(),
                    opt_time(credentials.token_expiry),
                    ts(Utc::now()),
                    id.to_string(),
                    max_active as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_account_credentials: {e}")))?;

        if updated > 0 {
            return Ok(true);
        }
        if self.get_account(id).await?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "account".into(),
                id: id.to_string(),
            });
        }
        Ok(false)
    }

    async fn update_account_token(
        &self,
        id: Uuid,
        access_token: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE accounts SET access_token = ?1, token_expiry = ?2, updated_at = ?3 WHERE id = ?4",
                params![access_token, opt_time(expiry), ts(Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_account_token: {e}")))?;
        Ok(())
    }

    async fn update_account_sync(
        &self,
        id: Uuid,
        history_id: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE accounts SET last_history_id = COALESCE(?1, last_history_id), last_check = ?2, updated_at = ?2 WHERE id = ?3",
                params![opt_text(history_id), ts(checked_at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_account_sync: {e}")))?;
        Ok(())
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE accounts SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                params![flag(active), ts(Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_account_active: {e}")))?;
        Ok(updated > 0)
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let id = id.to_string();
        conn.execute(
            "DELETE FROM user_feedback WHERE processed_email_id IN (SELECT id FROM processed_emails WHERE account_id = ?1)",
            params![id.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_account feedback: {e}")))?;
        conn.execute(
            "UPDATE notification_log SET processed_email_id = NULL WHERE processed_email_id IN (SELECT id FROM processed_emails WHERE account_id = ?1)",
            params![id.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_account notifications: {e}")))?;
        conn.execute(
            "DELETE FROM processed_emails WHERE account_id = ?1",
            params![id.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_account emails: {e}")))?;
        let deleted = conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_account: {e}")))?;
        Ok(deleted > 0)
    }

    // ── Sender lists ────────────────────────────────────────────────

    async fn add_sender_rule(
        &self,
        list: ListKind,
        entry_type: EntryType,
        value: &str,
        notes: Option<&str>,
    ) -> Result<(SenderRule, RuleChange), DatabaseError> {
        let conn = self.conn();
        let value = value.trim().to_lowercase();
        let now = Utc::now();

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM sender_rules WHERE list = ?1 AND entry_type = ?2 AND value = ?3"
                ),
                params![list.as_str(), entry_type.as_str(), value.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_sender_rule lookup: {e}")))?;

        let existing = match rows.next().await {
            Ok(Some(row)) => Some(
                row_to_rule(&row)
                    .map_err(|e| DatabaseError::Query(format!("add_sender_rule row parse: {e}")))?,
            ),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("add_sender_rule lookup: {e}"))),
        };

        match existing {
            Some(rule) if rule.is_active => Ok((rule, RuleChange::AlreadyPresent)),
            Some(mut rule) => {
                let notes = notes.map(String::from).or(rule.notes.take());
                conn.execute(
                    "UPDATE sender_rules SET is_active = 1, notes = ?1, updated_at = ?2 WHERE id = ?3",
                    params![opt_text(notes.as_deref()), ts(now), rule.id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("add_sender_rule reactivate: {e}")))?;
                rule.is_active = true;
                rule.notes = notes;
                rule.updated_at = now;
                Ok((rule, RuleChange::Reactivated))
            }
            None => {
                let rule = SenderRule {
                    id: Uuid::new_v4(),
                    list,
                    entry_type,
                    value,
                    notes: notes.map(String::from),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                };
                conn.execute(
                    &format!(
                        "INSERT INTO sender_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)"
                    ),
                    params![
                        rule.id.to_string(),
                        list.as_str(),
                        entry_type.as_str(),
                        rule.value.clone(),
                        opt_text(rule.notes.as_deref()),
                        ts(now),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("add_sender_rule insert: {e}")))?;
                debug!(list = %list, value = %rule.value, "Sender rule added");
                Ok((rule, RuleChange::Created))
            }
        }
    }

    async fn list_sender_rules(&self, list: ListKind) -> Result<Vec<SenderRule>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM sender_rules WHERE list = ?1 AND is_active = 1 ORDER BY created_at DESC"
                ),
                params![list.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sender_rules: {e}")))?;
        Ok(collect_rows(rows, row_to_rule, "list_sender_rules").await)
    }

    async fn update_sender_rule_notes(
        &self,
        list: ListKind,
        id: Uuid,
        notes: Option<&str>,
    ) -> Result<Option<SenderRule>, DatabaseError> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE sender_rules SET notes = ?1, updated_at = ?2 WHERE id = ?3 AND list = ?4 AND is_active = 1",
                params![opt_text(notes), ts(Utc::now()), id.to_string(), list.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_sender_rule_notes: {e}")))?;
        if updated == 0 {
            return Ok(None);
        }

        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM sender_rules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_sender_rule_notes reload: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row_to_rule(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("update_sender_rule_notes row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("update_sender_rule_notes reload: {e}"))),
        }
    }

    async fn deactivate_sender_rule(&self, list: ListKind, id: Uuid) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE sender_rules SET is_active = 0, updated_at = ?1 WHERE id = ?2 AND list = ?3 AND is_active = 1",
                params![ts(Utc::now()), id.to_string(), list.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_sender_rule: {e}")))?;
        Ok(updated > 0)
    }

    async fn match_sender_rule(
        &self,
        list: ListKind,
        email: &str,
    ) -> Result<Option<SenderRule>, DatabaseError> {
        let email = email.trim().to_lowercase();
        let domain = domain_of(&email).map(str::to_string);

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM sender_rules
                     WHERE list = ?1 AND is_active = 1
                       AND ((entry_type = 'email' AND value = ?2) OR (entry_type = 'domain' AND value = ?3))
                     ORDER BY CASE entry_type WHEN 'email' THEN 0 ELSE 1 END
                     LIMIT 1"
                ),
                params![list.as_str(), email, opt_text(domain.as_deref())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("match_sender_rule: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_rule(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("match_sender_rule row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("match_sender_rule: {e}"))),
        }
    }

    // ── Processed emails ────────────────────────────────────────────

    async fn is_email_processed(
        &self,
        account_id: Uuid,
        message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM processed_emails WHERE account_id = ?1 AND message_id = ?2",
                params![account_id.to_string(), message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_email_processed: {e}")))?;
        Ok(first_i64(&mut rows, "is_email_processed").await? > 0)
    }

    async fn insert_processed_email(&self, email: &ProcessedEmail) -> Result<(), DatabaseError> {
        let deadline = email.deadline_date.map(|d| d.format("%Y-%m-%d").to_string());
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO processed_emails ({EMAIL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
                ),
                params![
                    email.id.to_string(),
                    email.account_id.to_string(),
                    email.message_id.clone(),
                    opt_text(email.thread_id.as_deref()),
                    email.sender_email.clone(),
                    opt_text(email.sender_name.as_deref()),
                    email.subject.clone(),
                    ts(email.received_at),
                    flag(email.is_whitelisted),
                    email.importance_score,
                    opt_text(email.importance_reason.as_deref()),
                    opt_text(email.category.as_deref()),
                    flag(email.notification_sent),
                    opt_time(email.notification_sent_at),
                    opt_text(deadline.as_deref()),
                    opt_text(email.deadline_text.as_deref()),
                    flag(email.digest_eligible),
                    flag(email.digest_sent),
                    opt_time(email.digest_sent_at),
                    ts(email.processed_at),
                ],
            )
            .await
            .map_err(|e| match e.to_string() {
                msg if msg.contains("UNIQUE") => DatabaseError::Constraint(format!(
                    "message {} already processed for account {}",
                    email.message_id, email.account_id
                )),
                msg => DatabaseError::Query(format!("insert_processed_email: {msg}")),
            })?;
        Ok(())
    }

    async fn get_processed_email(&self, id: Uuid) -> Result<Option<ProcessedEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM processed_emails WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_processed_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_email(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_processed_email row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_processed_email: {e}"))),
        }
    }

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE processed_emails SET notification_sent = 1, notification_sent_at = ?1 WHERE id = ?2",
                params![ts(sent_at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_notification_sent: {e}")))?;
        Ok(())
    }

    async fn recent_processed_emails(
        &self,
        limit: usize,
    ) -> Result<Vec<ProcessedEmail>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM processed_emails ORDER BY processed_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_processed_emails: {e}")))?;
        Ok(collect_rows(rows, row_to_email, "recent_processed_emails").await)
    }

    async fn processed_emails_for_account(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ProcessedEmail>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM processed_emails WHERE account_id = ?1 ORDER BY processed_at DESC LIMIT ?2"
                ),
                params![account_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("processed_emails_for_account: {e}")))?;
        Ok(collect_rows(rows, row_to_email, "processed_emails_for_account").await)
    }

    async fn pending_digest_emails(&self) -> Result<Vec<ProcessedEmail>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM processed_emails WHERE digest_eligible = 1 AND digest_sent = 0 ORDER BY importance_score DESC, processed_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("pending_digest_emails: {e}")))?;
        Ok(collect_rows(rows, row_to_email, "pending_digest_emails").await)
    }

    async fn mark_digest_sent(
        &self,
        ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let sent_at = ts(sent_at);
        for id in ids {
            self.conn()
                .execute(
                    "UPDATE processed_emails SET digest_sent = 1, digest_sent_at = ?1 WHERE id = ?2",
                    params![sent_at.clone(), id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("mark_digest_sent: {e}")))?;
        }
        debug!(count = ids.len(), "Marked emails as digested");
        Ok(())
    }

    async fn email_stats(&self, day_start: DateTime<Utc>) -> Result<EmailStats, DatabaseError> {
        let today = libsql::Value::Text(ts(day_start));
        let none = libsql::Value::Integer(1);
        Ok(EmailStats {
            total_processed: self
                .count("SELECT COUNT(*) FROM processed_emails WHERE ?1 = 1", none.clone(), "email_stats")
                .await?,
            total_notified: self
                .count(
                    "SELECT COUNT(*) FROM processed_emails WHERE notification_sent = ?1",
                    none.clone(),
                    "email_stats",
                )
                .await?,
            processed_today: self
                .count(
                    "SELECT COUNT(*) FROM processed_emails WHERE processed_at >= ?1",
                    today.clone(),
                    "email_stats",
                )
                .await?,
            notified_today: self
                .count(
                    "SELECT COUNT(*) FROM processed_emails WHERE notification_sent = 1 AND notification_sent_at >= ?1",
                    today,
                    "email_stats",
                )
                .await?,
            active_accounts: self
                .count("SELECT COUNT(*) FROM accounts WHERE is_active = ?1", none, "email_stats")
                .await?,
            whitelist_entries: self
                .count(
                    "SELECT COUNT(*) FROM sender_rules WHERE list = ?1 AND is_active = 1",
                    libsql::Value::Text(ListKind::Whitelist.as_str().into()),
                    "email_stats",
                )
                .await?,
            blacklist_entries: self
                .count(
                    "SELECT COUNT(*) FROM sender_rules WHERE list = ?1 AND is_active = 1",
                    libsql::Value::Text(ListKind::Blacklist.as_str().into()),
                    "email_stats",
                )
                .await?,
        })
    }

    async fn digest_stats(&self) -> Result<DigestStats, DatabaseError> {
        let one = libsql::Value::Integer(1);
        Ok(DigestStats {
            pending_digest: self
                .count(
                    "SELECT COUNT(*) FROM processed_emails WHERE digest_eligible = ?1 AND digest_sent = 0",
                    one.clone(),
                    "digest_stats",
                )
                .await?,
            total_digested: self
                .count(
                    "SELECT COUNT(*) FROM processed_emails WHERE digest_sent = ?1",
                    one,
                    "digest_stats",
                )
                .await?,
        })
    }

    // ── Notification log ────────────────────────────────────────────

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO notification_log ({NOTIFICATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    record.id.to_string(),
                    opt_text(record.processed_email_id.map(|id| id.to_string()).as_deref()),
                    record.notification_type.as_str(),
                    record.title.clone(),
                    record.message.clone(),
                    i64::from(record.priority),
                    record.status.as_str(),
                    opt_text(record.error_message.as_deref()),
                    opt_text(record.receipt.as_deref()),
                    ts(record.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_notification: {e}")))?;
        Ok(())
    }

    async fn recent_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notification_log ORDER BY created_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_notifications: {e}")))?;
        Ok(collect_rows(rows, row_to_notification, "recent_notifications").await)
    }

    async fn prune_notifications(&self, before: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM notification_log WHERE created_at < ?1",
                params![ts(before)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_notifications: {e}")))?;
        if removed > 0 {
            info!(removed, "Pruned old notification log entries");
        }
        Ok(removed)
    }

    // ── Feedback ────────────────────────────────────────────────────

    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_feedback (id, processed_email_id, feedback_type, original_score, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.processed_email_id.to_string(),
                    record.feedback_type.as_str(),
                    record.original_score,
                    ts(record.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_feedback: {e}")))?;
        Ok(())
    }

    async fn get_learned_pattern(
        &self,
        pattern_type: PatternType,
        value: &str,
    ) -> Result<Option<LearnedPattern>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PATTERN_COLUMNS} FROM learned_patterns WHERE pattern_type = ?1 AND pattern_value = ?2"
                ),
                params![pattern_type.as_str(), value.trim().to_lowercase()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_learned_pattern: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_pattern(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_learned_pattern row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_learned_pattern: {e}"))),
        }
    }

    async fn upsert_learned_pattern(&self, pattern: &LearnedPattern) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO learned_patterns ({PATTERN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT (pattern_type, pattern_value) DO UPDATE SET
                        score_adjustment = ?4, feedback_count = ?5, updated_at = ?7"
                ),
                params![
                    pattern.id.to_string(),
                    pattern.pattern_type.as_str(),
                    pattern.pattern_value.trim().to_lowercase(),
                    pattern.score_adjustment,
                    pattern.feedback_count,
                    ts(pattern.created_at),
                    ts(pattern.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_learned_pattern: {e}")))?;
        Ok(())
    }

    async fn list_learned_patterns(
        &self,
        limit: usize,
    ) -> Result<Vec<LearnedPattern>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PATTERN_COLUMNS} FROM learned_patterns ORDER BY ABS(score_adjustment) DESC, feedback_count DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_learned_patterns: {e}")))?;
        Ok(collect_rows(rows, row_to_pattern, "list_learned_patterns").await)
    }

    async fn feedback_stats(&self) -> Result<FeedbackStats, DatabaseError> {
        let kind = |t: FeedbackType| libsql::Value::Text(t.as_str().to_string());
        Ok(FeedbackStats {
            total_feedback: self
                .count(
                    "SELECT COUNT(*) FROM user_feedback WHERE ?1 = 1",
                    libsql::Value::Integer(1),
                    "feedback_stats",
                )
                .await?,
            important_count: self
                .count(
                    "SELECT COUNT(*) FROM user_feedback WHERE feedback_type = ?1",
                    kind(FeedbackType::Important),
                    "feedback_stats",
                )
                .await?,
            not_important_count: self
                .count(
                    "SELECT COUNT(*) FROM user_feedback WHERE feedback_type = ?1",
                    kind(FeedbackType::NotImportant),
                    "feedback_stats",
                )
                .await?,
            learned_patterns: self
                .count(
                    "SELECT COUNT(*) FROM learned_patterns WHERE ?1 = 1",
                    libsql::Value::Integer(1),
                    "feedback_stats",
                )
                .await?,
        })
    }
}
