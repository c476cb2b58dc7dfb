//! Error types for the email alerter.

use std::time::Duration;

use crate::jobs::JobKind;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mail provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Authentication failed for {account}: {reason}")]
    AuthFailed { account: String, reason: String },

    #[error("History cursor {cursor} is no longer valid")]
    HistoryExpired { cursor: String },

    #[error("Mail provider rate limited")]
    RateLimited,

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to parse message {id}: {reason}")]
    Parse { id: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned server error {status}")]
    ServerError { provider: String, status: u16 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed { .. } | LlmError::RateLimited { .. } | LlmError::ServerError { .. }
        )
    }
}

/// Push notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {name} rejected the message: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Notifier {name} rate limited")]
    RateLimited { name: String },

    #[error("Notifier {name} returned server error {status}")]
    ServerError { name: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl NotifyError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotifyError::RateLimited { .. } | NotifyError::ServerError { .. } | NotifyError::Http(_)
        )
    }
}

/// Check/digest pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to fetch mail: {0}")]
    Fetch(#[from] MailError),

    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Maximum of {max} active accounts reached")]
    AccountLimit { max: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Why a check or digest job did not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Missing configuration: {}", .0.join(", "))]
    MissingConfig(Vec<&'static str>),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0} already running")]
    Busy(JobKind),

    #[error("{job} job aborted: {reason}")]
    Aborted { job: JobKind, reason: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Deploy tool errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("gcloud CLI not found. Install it from https://cloud.google.com/sdk/docs/install")]
    CliMissing,

    #[error("Not authenticated. Run: gcloud auth login")]
    NotAuthenticated,

    #[error("Failed to set project {project}")]
    ProjectNotSet { project: String },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Cannot pass environment variables to gcloud: {0}")]
    InvalidEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;
