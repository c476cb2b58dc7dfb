//! In-process scheduler for deployments without an external one.
//!
//! Fires the check job every `CHECK_INTERVAL_MINUTES` and the digest once a
//! day at `DIGEST_HOUR` in the configured UTC offset. Jobs go through the
//! same locks as the HTTP triggers, so an overlapping run is skipped.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{ConfigError, JobError};
use crate::jobs::JobKind;
use crate::service::Services;

const TICK: Duration = Duration::from_secs(1);

/// A job and when it fires.
#[derive(Debug, Clone)]
pub struct CronJob {
    pub kind: JobKind,
    pub schedule: Schedule,
    pub offset: FixedOffset,
}

impl CronJob {
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.offset))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

fn parse(key: &str, expr: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid cron '{expr}': {e}"),
    })
}

/// Cron expressions (with a seconds field) for both jobs.
pub fn cron_jobs(config: &AppConfig) -> Result<Vec<CronJob>, ConfigError> {
    let offset = FixedOffset::east_opt(config.digest.utc_offset_hours * 3600).ok_or_else(|| {
        ConfigError::InvalidValue {
            key: "DIGEST_UTC_OFFSET_HOURS".into(),
            message: format!("{} is not a valid offset", config.digest.utc_offset_hours),
        }
    })?;

    let mut jobs = vec![CronJob {
        kind: JobKind::Check,
        schedule: parse(
            "CHECK_INTERVAL_MINUTES",
            &format!("0 */{} * * * *", config.check_interval_minutes),
        )?,
        offset,
    }];
    if config.digest.enabled {
        jobs.push(CronJob {
            kind: JobKind::Digest,
            schedule: parse("DIGEST_HOUR", &format!("0 0 {} * * *", config.digest.hour))?,
            offset,
        });
    }
    Ok(jobs)
}

async fn run_job(services: &Services, kind: JobKind) {
    let result = match kind {
        JobKind::Check => services.run_check().await.map(|s| {
            format!(
                "{} accounts, {} analyzed, {} notified",
                s.accounts_processed, s.total_emails_analyzed, s.total_notifications_sent
            )
        }),
        JobKind::Digest => services
            .run_digest()
            .await
            .map(|o| format!("{} emails included", o.emails_included)),
    };
    match result {
        Ok(detail) => info!(job = %kind, %detail, "Scheduled job finished"),
        Err(JobError::Busy(_)) => info!(job = %kind, "Previous run still in progress, skipping"),
        Err(e) => error!(job = %kind, error = %e, "Scheduled job failed"),
    }
}

/// Spawn the scheduler loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop it.
pub fn spawn_scheduler(
    services: Services,
) -> Result<(JoinHandle<()>, Arc<AtomicBool>), ConfigError> {
    let jobs = cron_jobs(&services.config)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let now = Utc::now();
        let mut next: Vec<Option<DateTime<Utc>>> = jobs.iter().map(|j| j.next_after(now)).collect();
        for (job, at) in jobs.iter().zip(&next) {
            info!(job = %job.kind, next = ?at, "Scheduler armed");
        }

        let mut tick = tokio::time::interval(TICK);
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Scheduler shutting down");
                return;
            }

            let now = Utc::now();
            for (job, at) in jobs.iter().zip(next.iter_mut()) {
                if at.is_some_and(|t| t <= now) {
                    let services = services.clone();
                    let kind = job.kind;
                    tokio::spawn(async move { run_job(&services, kind).await });
                    *at = job.next_after(now);
                }
            }
        }
    });

    Ok((handle, shutdown_flag))
}
