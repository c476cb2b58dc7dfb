//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT,
                access_token TEXT,
                refresh_token TEXT,
                token_expiry TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_check TEXT,
                last_history_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_active ON accounts(is_active);

            CREATE TABLE IF NOT EXISTS sender_rules (
                id TEXT PRIMARY KEY,
                list TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                value TEXT NOT NULL,
                notes TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (list, entry_type, value)
            );
            CREATE INDEX IF NOT EXISTS idx_sender_rules_lookup
                ON sender_rules(list, value, is_active);

            CREATE TABLE IF NOT EXISTS processed_emails (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                message_id TEXT NOT NULL,
                thread_id TEXT,
                sender_email TEXT NOT NULL,
                sender_name TEXT,
                subject TEXT NOT NULL,
                received_at TEXT NOT NULL,
                is_whitelisted INTEGER NOT NULL DEFAULT 0,
                importance_score REAL NOT NULL,
                importance_reason TEXT,
                category TEXT,
                notification_sent INTEGER NOT NULL DEFAULT 0,
                notification_sent_at TEXT,
                deadline_date TEXT,
                deadline_text TEXT,
                digest_eligible INTEGER NOT NULL DEFAULT 0,
                digest_sent INTEGER NOT NULL DEFAULT 0,
                digest_sent_at TEXT,
                processed_at TEXT NOT NULL,
                UNIQUE (account_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_processed_emails_processed_at
                ON processed_emails(processed_at);
            CREATE INDEX IF NOT EXISTS idx_processed_emails_digest
                ON processed_emails(digest_eligible, digest_sent);

            CREATE TABLE IF NOT EXISTS notification_log (
                id TEXT PRIMARY KEY,
                processed_email_id TEXT REFERENCES processed_emails(id) ON DELETE SET NULL,
                notification_type TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                error_message TEXT,
                receipt TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notification_log_created
                ON notification_log(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "feedback_learning",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_feedback (
                id TEXT PRIMARY KEY,
                processed_email_id TEXT NOT NULL REFERENCES processed_emails(id) ON DELETE CASCADE,
                feedback_type TEXT NOT NULL,
                original_score REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS learned_patterns (
                id TEXT PRIMARY KEY,
                pattern_type TEXT NOT NULL,
                pattern_value TEXT NOT NULL,
                score_adjustment REAL NOT NULL DEFAULT 0,
                feedback_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (pattern_type, pattern_value)
            );
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            record_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!("Database migrations complete (at V{version})");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn record_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
