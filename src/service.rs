//! Shared service handles and the two jobs (check, digest) that both the
//! HTTP API and the in-process scheduler run.

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::error::JobError;
use crate::jobs::{JobKind, JobLocks};
use crate::llm::{LlmConfig, LlmProvider, create_provider};
use crate::mail::MailSource;
use crate::mail::gmail::GmailClient;
use crate::notify::format::test_notification;
use crate::notify::pushover::PushoverClient;
use crate::notify::Notifier;
use crate::pipeline::gate::DeliveryReport;
use crate::pipeline::{
    Alerter, CheckSummary, Checker, DigestOutcome, DigestSender, GateConfig, Scorer,
};
use crate::retry::RetryPolicy;
use crate::store::{Database, NotificationType};

/// Everything a job needs. Clients are `None` until their credentials
/// are configured.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub db: Arc<dyn Database>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub mail: Option<Arc<dyn MailSource>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub jobs: JobLocks,
    pub retry: RetryPolicy,
}

impl Services {
    pub fn new(config: AppConfig, db: Arc<dyn Database>) -> Self {
        Self {
            config: Arc::new(config),
            db,
            llm: None,
            mail: None,
            notifier: None,
            jobs: JobLocks::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Build the real Anthropic, Gmail and Pushover clients for whatever
    /// credentials are configured.
    pub fn from_config(config: AppConfig, db: Arc<dyn Database>) -> Self {
        let llm = config.anthropic_api_key.clone().map(|api_key| {
            create_provider(&LlmConfig {
                api_key,
                model: config.claude_model.clone(),
                url: None,
            })
        });
        let mail = match (&config.google.client_id, &config.google.client_secret) {
            (Some(id), Some(secret)) => {
                Some(Arc::new(GmailClient::new(id.clone(), secret.clone())) as Arc<dyn MailSource>)
            }
            _ => None,
        };
        let notifier = match (&config.pushover.user_key, &config.pushover.api_token) {
            (Some(user), Some(token)) => {
                Some(Arc::new(PushoverClient::new(user.clone(), token.clone())) as Arc<dyn Notifier>)
            }
            _ => None,
        };

        let mut services = Self::new(config, db);
        services.llm = llm;
        services.mail = mail;
        services.notifier = notifier;
        services
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailSource>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn gate_config(&self) -> GateConfig {
        let digest = &self.config.digest;
        GateConfig {
            importance_threshold: self.config.importance_threshold,
            digest_band: digest
                .enabled
                .then_some((digest.threshold_low, digest.threshold_high)),
        }
    }

    fn alerter(&self, notifier: &Arc<dyn Notifier>) -> Alerter {
        Alerter::new(Arc::clone(&self.db), Arc::clone(notifier)).with_retry_policy(self.retry)
    }

    /// Settings the check cycle needs, including clients that were never built.
    fn missing_for_check(&self) -> Vec<&'static str> {
        let mut missing = self.config.missing_required();
        let mut need = |key: &'static str| {
            if !missing.contains(&key) {
                missing.push(key);
            }
        };
        if self.mail.is_none() {
            need("GOOGLE_CLIENT_ID");
            need("GOOGLE_CLIENT_SECRET");
        }
        if self.llm.is_none() {
            need("ANTHROPIC_API_KEY");
        }
        if self.notifier.is_none() {
            need("PUSHOVER_USER_KEY");
            need("PUSHOVER_API_TOKEN");
        }
        missing
    }

    /// Run one check cycle, unless one is already running.
    pub async fn run_check(&self) -> Result<CheckSummary, JobError> {
        let missing = self.missing_for_check();
        let (Some(llm), Some(mail), Some(notifier)) = (&self.llm, &self.mail, &self.notifier)
        else {
            return Err(JobError::MissingConfig(missing));
        };
        if !missing.is_empty() {
            return Err(JobError::MissingConfig(missing));
        }

        let _guard = self
            .jobs
            .try_acquire(JobKind::Check)
            .ok_or(JobError::Busy(JobKind::Check))?;
        info!("Check started");

        let checker = Checker::new(
            Arc::clone(&self.db),
            Arc::clone(mail),
            Scorer::new(Arc::clone(llm), Arc::clone(&self.db)).with_retry_policy(self.retry),
            self.alerter(notifier),
            self.gate_config(),
            self.config.max_emails_per_check,
        );
        Ok(checker.run_check().await?)
    }

    /// Send the daily digest, unless it is disabled or already running.
    pub async fn run_digest(&self) -> Result<DigestOutcome, JobError> {
        if !self.config.digest.enabled {
            return Err(JobError::Unavailable("Digest mode is disabled".into()));
        }
        let notifier = self.configured_notifier()?;

        let _guard = self
            .jobs
            .try_acquire(JobKind::Digest)
            .ok_or(JobError::Busy(JobKind::Digest))?;
        info!("Digest started");

        let sender = DigestSender::new(
            Arc::clone(&self.db),
            self.alerter(notifier),
            self.config.notification_retention_days,
        );
        Ok(sender.send_digest().await?)
    }

    /// Send a test notification to verify the Pushover credentials.
    pub async fn send_test_notification(&self) -> Result<DeliveryReport, JobError> {
        let notifier = self.configured_notifier()?;
        let report = self
            .alerter(notifier)
            .deliver(&test_notification(), NotificationType::Test, None)
            .await?;
        Ok(report)
    }

    fn configured_notifier(&self) -> Result<&Arc<dyn Notifier>, JobError> {
        match &self.notifier {
            Some(notifier) if self.config.pushover.is_configured() => Ok(notifier),
            _ => Err(JobError::Unavailable("Pushover not configured".into())),
        }
    }
}
