//! The check cycle: fetch new mail for every active account, score it,
//! and alert on what matters.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::mail::{FetchedEmail, MailSource};
use crate::pipeline::gate::{Alerter, GateConfig, GateDecision};
use crate::pipeline::scorer::{Scorer, round_score};
use crate::store::{Account, Database, ListKind, ProcessedEmail};

/// Per-account outcome of a check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountResult {
    pub account_email: String,
    pub emails_fetched: usize,
    pub emails_analyzed: usize,
    pub notifications_sent: usize,
    pub errors: Vec<String>,
}

/// Outcome of a whole check cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckSummary {
    pub accounts_processed: usize,
    pub total_emails_fetched: usize,
    pub total_emails_analyzed: usize,
    pub total_notifications_sent: usize,
    pub account_results: Vec<AccountResult>,
    pub errors: Vec<String>,
}

impl CheckSummary {
    fn add(&mut self, result: AccountResult) {
        self.accounts_processed += 1;
        self.total_emails_fetched += result.emails_fetched;
        self.total_emails_analyzed += result.emails_analyzed;
        self.total_notifications_sent += result.notifications_sent;
        self.errors.extend(
            result
                .errors
                .iter()
                .map(|e| format!("{}: {e}", result.account_email)),
        );
        self.account_results.push(result);
    }
}

/// Runs check cycles.
pub struct Checker {
    db: Arc<dyn Database>,
    mail: Arc<dyn MailSource>,
    scorer: Scorer,
    alerter: Alerter,
    gate: GateConfig,
    max_emails: usize,
}

impl Checker {
    pub fn new(
        db: Arc<dyn Database>,
        mail: Arc<dyn MailSource>,
        scorer: Scorer,
        alerter: Alerter,
        gate: GateConfig,
        max_emails: usize,
    ) -> Self {
        Self {
            db,
            mail,
            scorer,
            alerter,
            gate,
            max_emails,
        }
    }

    /// Check every active account concurrently. Failures are collected in
    /// the summary; only failing to list the accounts is an error.
    pub async fn run_check(&self) -> Result<CheckSummary, PipelineError> {
        let accounts = self.db.list_active_accounts().await?;
        let mut summary = CheckSummary::default();

        if accounts.is_empty() {
            info!("No active accounts to check");
            return Ok(summary);
        }

        let results = join_all(accounts.into_iter().map(|a| self.check_account(a))).await;
        for result in results {
            summary.add(result);
        }

        info!(
            accounts = summary.accounts_processed,
            fetched = summary.total_emails_fetched,
            analyzed = summary.total_emails_analyzed,
            notified = summary.total_notifications_sent,
            errors = summary.errors.len(),
            "Check complete"
        );
        Ok(summary)
    }

    async fn check_account(&self, account: Account) -> AccountResult {
        let mut result = AccountResult {
            account_email: account.email.clone(),
            ..Default::default()
        };

        if let Err(e) = self.sync_account(&account, &mut result).await {
            error!(account = %account.email, error = %e, "Account check failed");
            result.errors.push(e.to_string());
        }
        result
    }

    async fn sync_account(
        &self,
        account: &Account,
        result: &mut AccountResult,
    ) -> Result<(), PipelineError> {
        let now = Utc::now();
        let access_token = match account.access_token.clone() {
            Some(token) if !account.is_token_expired(now) => token,
            _ => {
                let fresh = self.mail.refresh_access_token(account).await?;
                self.db
                    .update_account_token(account.id, &fresh.token, fresh.expires_at)
                    .await?;
                debug!(account = %account.email, "Access token refreshed");
                fresh.token
            }
        };

        let batch = self
            .mail
            .fetch_new(&access_token, account.last_history_id.as_deref(), self.max_emails)
            .await?;
        result.emails_fetched = batch.emails.len();
        info!(account = %account.email, count = batch.emails.len(), "Fetched emails");

        let today = now.date_naive();
        let mut model_failed = false;

        for email in &batch.emails {
            if self.db.is_email_processed(account.id, &email.message_id).await? {
                debug!(id = %email.message_id, "Skipping already processed");
                continue;
            }

            match self.process_message(account, email, today).await {
                Ok(Some(processed)) => {
                    result.emails_analyzed += 1;
                    if processed.notification_sent {
                        result.notifications_sent += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if matches!(e, PipelineError::Llm(_)) {
                        model_failed = true;
                    }
                    warn!(id = %email.message_id, error = %e, "Failed to process email");
                    result
                        .errors
                        .push(format!("Failed to process email {}: {e}", email.message_id));
                }
            }
        }

        // A model failure leaves the cursor where it was so the message is
        // fetched again next cycle.
        let cursor = if model_failed { None } else { batch.cursor.as_deref() };
        self.db.update_account_sync(account.id, cursor, Utc::now()).await?;
        Ok(())
    }

    /// Score, record and (when important enough) alert one message.
    /// Returns `None` for blacklisted senders.
    async fn process_message(
        &self,
        account: &Account,
        email: &FetchedEmail,
        today: NaiveDate,
    ) -> Result<Option<ProcessedEmail>, PipelineError> {
        if self
            .db
            .match_sender_rule(ListKind::Blacklist, &email.sender_email)
            .await?
            .is_some()
        {
            info!(sender = %email.sender_email, "Skipping blacklisted sender");
            return Ok(None);
        }

        let whitelisted = self
            .db
            .match_sender_rule(ListKind::Whitelist, &email.sender_email)
            .await?
            .is_some();

        let analysis = self.scorer.score(email, whitelisted).await?;
        let raw_score = analysis.score;
        let decision = self.gate.decide(raw_score);
        let score = round_score(raw_score);
        info!(
            id = %email.message_id,
            score = raw_score,
            category = %analysis.category,
            ?decision,
            "Email scored"
        );

        let mut processed = ProcessedEmail {
            id: Uuid::new_v4(),
            account_id: account.id,
            message_id: email.message_id.clone(),
            thread_id: email.thread_id.clone(),
            sender_email: email.sender_email.clone(),
            sender_name: email.sender_name.clone(),
            subject: email.subject.clone(),
            received_at: email.received_at,
            is_whitelisted: whitelisted,
            importance_score: score,
            importance_reason: Some(analysis.reason),
            category: Some(analysis.category),
            notification_sent: false,
            notification_sent_at: None,
            deadline_date: analysis.deadline_date,
            deadline_text: analysis.deadline_text,
            digest_eligible: decision == GateDecision::Digest,
            digest_sent: false,
            digest_sent_at: None,
            processed_at: Utc::now(),
        };
        self.db.insert_processed_email(&processed).await?;

        if decision == GateDecision::Alert {
            self.alerter.alert(&mut processed, raw_score, &account.email, today)
                .await?;
        }
        Ok(Some(processed))
    }
}
