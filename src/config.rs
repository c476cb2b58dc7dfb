//! Configuration types.
//!
//! Everything is read from environment variables. Values the check cycle
//! cannot run without are optional here and reported by
//! [`AppConfig::missing_required`], so the HTTP surface (health, lists,
//! stats) stays up while credentials are being provisioned.

use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default model used for importance scoring.
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-haiku-20240307";

/// Default OAuth redirect URI.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5000/auth/callback";

/// Google OAuth client settings.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub redirect_uri: String,
}

/// Pushover credentials.
#[derive(Debug, Clone, Default)]
pub struct PushoverConfig {
    pub user_key: Option<SecretString>,
    pub api_token: Option<SecretString>,
}

impl PushoverConfig {
    pub fn is_configured(&self) -> bool {
        self.user_key.is_some() && self.api_token.is_some()
    }
}

/// Daily digest settings.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    pub enabled: bool,
    /// Lowest score that still lands in the digest.
    pub threshold_low: f64,
    /// Highest score that lands in the digest.
    pub threshold_high: f64,
    /// Local hour (0-23) the digest goes out.
    pub hour: u32,
    /// Offset of the digest timezone from UTC, in hours.
    pub utc_offset_hours: i32,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_low: 0.5,
            threshold_high: 0.69,
            hour: 8,
            utc_offset_hours: 0,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// libSQL location: a file path, `:memory:`, or a `libsql://` URL.
    pub database_url: Option<String>,
    /// Auth token for remote libSQL databases.
    pub database_auth_token: Option<SecretString>,
    pub google: GoogleConfig,
    pub anthropic_api_key: Option<SecretString>,
    pub claude_model: String,
    pub pushover: PushoverConfig,
    /// Score at or above which an immediate alert is sent.
    pub importance_threshold: f64,
    pub check_interval_minutes: u32,
    pub max_emails_per_check: usize,
    pub digest: DigestConfig,
    pub notification_retention_days: u32,
    pub port: u16,
    /// Run the check and digest jobs from an in-process scheduler.
    pub scheduler_enabled: bool,
    /// Directory for rolling log files. Unset logs to stderr only.
    pub log_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_auth_token: None,
            google: GoogleConfig {
                client_id: None,
                client_secret: None,
                redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            },
            anthropic_api_key: None,
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            pushover: PushoverConfig::default(),
            importance_threshold: 0.7,
            check_interval_minutes: 15,
            max_emails_per_check: 50,
            digest: DigestConfig::default(),
            notification_retention_days: 30,
            port: 8080,
            scheduler_enabled: false,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secret = |key: &str| get(key).map(SecretString::from);
        let defaults = Self::default();

        let config = Self {
            database_url: get("DATABASE_URL"),
            database_auth_token: secret("DATABASE_AUTH_TOKEN"),
            google: GoogleConfig {
                client_id: get("GOOGLE_CLIENT_ID"),
                client_secret: secret("GOOGLE_CLIENT_SECRET"),
                redirect_uri: get("GOOGLE_REDIRECT_URI")
                    .unwrap_or(defaults.google.redirect_uri),
            },
            anthropic_api_key: secret("ANTHROPIC_API_KEY"),
            claude_model: get("CLAUDE_MODEL").unwrap_or(defaults.claude_model),
            pushover: PushoverConfig {
                user_key: secret("PUSHOVER_USER_KEY"),
                api_token: secret("PUSHOVER_API_TOKEN"),
            },
            importance_threshold: parse_or(
                "IMPORTANCE_THRESHOLD",
                get("IMPORTANCE_THRESHOLD"),
                defaults.importance_threshold,
            )?,
            check_interval_minutes: parse_or(
                "CHECK_INTERVAL_MINUTES",
                get("CHECK_INTERVAL_MINUTES"),
                defaults.check_interval_minutes,
            )?,
            max_emails_per_check: parse_or(
                "MAX_EMAILS_PER_CHECK",
                get("MAX_EMAILS_PER_CHECK"),
                defaults.max_emails_per_check,
            )?,
            digest: DigestConfig {
                enabled: get("DIGEST_ENABLED")
                    .map(|v| parse_bool(&v))
                    .unwrap_or(defaults.digest.enabled),
                threshold_low: parse_or(
                    "DIGEST_THRESHOLD_LOW",
                    get("DIGEST_THRESHOLD_LOW"),
                    defaults.digest.threshold_low,
                )?,
                threshold_high: parse_or(
                    "DIGEST_THRESHOLD_HIGH",
                    get("DIGEST_THRESHOLD_HIGH"),
                    defaults.digest.threshold_high,
                )?,
                hour: parse_or("DIGEST_HOUR", get("DIGEST_HOUR"), defaults.digest.hour)?,
                utc_offset_hours: parse_or(
                    "DIGEST_UTC_OFFSET_HOURS",
                    get("DIGEST_UTC_OFFSET_HOURS"),
                    defaults.digest.utc_offset_hours,
                )?,
            },
            notification_retention_days: parse_or(
                "NOTIFICATION_RETENTION_DAYS",
                get("NOTIFICATION_RETENTION_DAYS"),
                defaults.notification_retention_days,
            )?,
            port: parse_or("PORT", get("PORT"), defaults.port)?,
            scheduler_enabled: get("SCHEDULER_ENABLED")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.scheduler_enabled),
            log_dir: get("LOG_DIR"),
        };

        config.check_ranges()?;
        Ok(config)
    }

    /// Names of the settings a check cycle needs but that are unset.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.database_url.is_none() {
            missing.push("DATABASE_URL");
        }
        if self.google.client_id.is_none() {
            missing.push("GOOGLE_CLIENT_ID");
        }
        if self.google.client_secret.is_none() {
            missing.push("GOOGLE_CLIENT_SECRET");
        }
        if self.anthropic_api_key.is_none() {
            missing.push("ANTHROPIC_API_KEY");
        }
        if self.pushover.user_key.is_none() {
            missing.push("PUSHOVER_USER_KEY");
        }
        if self.pushover.api_token.is_none() {
            missing.push("PUSHOVER_API_TOKEN");
        }
        missing
    }

    fn check_ranges(&self) -> Result<(), ConfigError> {
        let unit = |key: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(invalid(key, format!("{v} is outside 0.0..=1.0")))
            }
        };
        unit("IMPORTANCE_THRESHOLD", self.importance_threshold)?;
        unit("DIGEST_THRESHOLD_LOW", self.digest.threshold_low)?;
        unit("DIGEST_THRESHOLD_HIGH", self.digest.threshold_high)?;

        if self.digest.threshold_low > self.digest.threshold_high {
            return Err(invalid(
                "DIGEST_THRESHOLD_LOW",
                "must not exceed DIGEST_THRESHOLD_HIGH".to_string(),
            ));
        }
        if self.digest.hour > 23 {
            return Err(invalid("DIGEST_HOUR", format!("{} is not an hour of the day", self.digest.hour)));
        }
        if !(-12..=14).contains(&self.digest.utc_offset_hours) {
            return Err(invalid(
                "DIGEST_UTC_OFFSET_HOURS",
                format!("{} is outside -12..=14", self.digest.utc_offset_hours),
            ));
        }
        if !(1..=59).contains(&self.check_interval_minutes) {
            return Err(invalid(
                "CHECK_INTERVAL_MINUTES",
                format!("{} is outside 1..=59", self.check_interval_minutes),
            ));
        }
        // Gmail caps list pages at 500.
        if !(1..=500).contains(&self.max_emails_per_check) {
            return Err(invalid(
                "MAX_EMAILS_PER_CHECK",
                format!("{} is outside 1..=500", self.max_emails_per_check),
            ));
        }
        Ok(())
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v.parse().map_err(|e| invalid(key, format!("{v:?}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}
