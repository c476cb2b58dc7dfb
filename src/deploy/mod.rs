//! Deployment to Cloud Run and Cloud Scheduler through the `gcloud` CLI.
//!
//! Every command first checks that the CLI is installed, that an account
//! is logged in and that the project can be selected. Scheduler jobs are
//! created, or updated when they already exist, so re-running is safe.

pub mod runner;

pub use runner::{CommandOutput, CommandRunner, SystemRunner};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::DeployError;

const GCLOUD: &str = "gcloud";

/// Delimiters tried, in order, when an env value contains a comma.
const ENV_DELIMITERS: &[char] = &['@', '|', ';', '#', '~', '!', '%', '+'];

/// Secrets mounted into the service: (env var, Secret Manager secret).
pub const DEFAULT_SECRETS: &[(&str, &str)] = &[
    ("DATABASE_URL", "database-url"),
    ("DATABASE_AUTH_TOKEN", "database-auth-token"),
    ("GOOGLE_CLIENT_ID", "google-client-id"),
    ("GOOGLE_CLIENT_SECRET", "google-client-secret"),
    ("ANTHROPIC_API_KEY", "anthropic-api-key"),
    ("PUSHOVER_USER_KEY", "pushover-user-key"),
    ("PUSHOVER_API_TOKEN", "pushover-api-token"),
];

/// Target project and service.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub project_id: String,
    pub region: String,
    pub service_name: String,
}

impl DeployTarget {
    pub fn image(&self) -> String {
        format!("gcr.io/{}/{}", self.project_id, self.service_name)
    }
}

/// Scheduler job settings.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    /// Service base URL. Looked up from Cloud Run when unset.
    pub service_url: Option<String>,
    pub check_interval_minutes: u32,
    pub digest_hour: u32,
    pub time_zone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub name: String,
    pub schedule: String,
    pub uri: String,
    pub action: JobAction,
}

/// Value for `--set-env-vars`. gcloud splits the list on commas, so a value
/// containing one switches to the `^DELIM^K=V@K2=V2` form.
fn env_vars_arg(env: &[(String, String)]) -> Result<Option<String>, DeployError> {
    if env.is_empty() {
        return Ok(None);
    }
    let pairs: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    if !pairs.iter().any(|p| p.contains(',')) {
        return Ok(Some(pairs.join(",")));
    }
    let delim = ENV_DELIMITERS
        .iter()
        .find(|d| !pairs.iter().any(|p| p.contains(**d)))
        .ok_or_else(|| {
            DeployError::InvalidEnv("values use every supported list delimiter".into())
        })?;
    Ok(Some(format!("^{delim}^{}", pairs.join(&delim.to_string()))))
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn command_line(a: &[String]) -> String {
    format!("{GCLOUD} {}", a.join(" "))
}

/// Drives `gcloud` through a [`CommandRunner`].
pub struct Deployer<'a> {
    runner: &'a dyn CommandRunner,
    target: DeployTarget,
}

impl<'a> Deployer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, target: DeployTarget) -> Self {
        Self { runner, target }
    }

    /// Run a gcloud command, failing on a non-zero exit.
    async fn gcloud(&self, a: Vec<String>) -> Result<String, DeployError> {
        let out = self.runner.run(GCLOUD, &a).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(DeployError::CommandFailed {
                command: command_line(&a),
                stderr: out.stderr,
            })
        }
    }

    pub async fn check_preconditions(&self) -> Result<(), DeployError> {
        match self.runner.run(GCLOUD, &args(&["--version"])).await {
            Ok(out) if out.success => {}
            _ => return Err(DeployError::CliMissing),
        }

        let accounts = self
            .runner
            .run(
                GCLOUD,
                &args(&["auth", "list", "--filter=status:ACTIVE", "--format=value(account)"]),
            )
            .await?;
        if !accounts.success || accounts.stdout.trim().is_empty() {
            return Err(DeployError::NotAuthenticated);
        }

        let project = &self.target.project_id;
        let set = self
            .runner
            .run(GCLOUD, &args(&["config", "set", "project", project.as_str()]))
            .await?;
        if !set.success {
            return Err(DeployError::ProjectNotSet {
                project: project.clone(),
            });
        }

        info!(project = %project, account = %accounts.stdout.trim(), "gcloud ready");
        Ok(())
    }

    /// Build the image, deploy it to Cloud Run and return the service URL.
    pub async fn deploy(&self, env: &[(String, String)]) -> Result<String, DeployError> {
        let env_vars = env_vars_arg(env)?;
        self.check_preconditions().await?;
        let t = &self.target;
        let image = t.image();

        info!(image = %image, "Building image");
        self.gcloud(args(&["builds", "submit", "--tag", image.as_str()])).await?;

        let mut deploy = args(&[
            "run",
            "deploy",
            t.service_name.as_str(),
            "--image",
            image.as_str(),
            "--region",
            t.region.as_str(),
            "--platform",
            "managed",
            "--allow-unauthenticated",
            "--memory",
            "512Mi",
            "--timeout",
            "300",
        ]);
        if let Some(vars) = env_vars {
            deploy.push("--set-env-vars".into());
            deploy.push(vars);
        }
        let secrets: Vec<String> = DEFAULT_SECRETS
            .iter()
            .map(|(var, secret)| format!("{var}={secret}:latest"))
            .collect();
        deploy.push("--set-secrets".into());
        deploy.push(secrets.join(","));

        info!(service = %t.service_name, region = %t.region, "Deploying to Cloud Run");
        self.gcloud(deploy).await?;

        let url = self.service_url().await?;
        info!(url = %url, "Service deployed");
        Ok(url)
    }

    async fn service_url(&self) -> Result<String, DeployError> {
        let t = &self.target;
        let url = self
            .gcloud(args(&[
                "run",
                "services",
                "describe",
                t.service_name.as_str(),
                "--region",
                t.region.as_str(),
                "--format=value(status.url)",
            ]))
            .await?;
        Ok(url.trim().trim_end_matches('/').to_string())
    }

    /// Create or update the check and digest scheduler jobs.
    pub async fn schedule(&self, settings: &ScheduleSettings) -> Result<Vec<ScheduledJob>, DeployError> {
        self.check_preconditions().await?;
        let base = match &settings.service_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => self.service_url().await?,
        };
        let service = &self.target.service_name;

        let jobs = [
            (
                format!("{service}-check"),
                format!("*/{} * * * *", settings.check_interval_minutes),
                format!("{base}/api/check-now"),
            ),
            (
                format!("{service}-digest"),
                format!("0 {} * * *", settings.digest_hour),
                format!("{base}/api/send-digest"),
            ),
        ];

        let mut scheduled = Vec::new();
        for (name, schedule, uri) in jobs {
            let action = self.upsert_job(&name, &schedule, &uri, &settings.time_zone).await?;
            info!(job = %name, schedule = %schedule, ?action, "Scheduler job ready");
            scheduled.push(ScheduledJob {
                name,
                schedule,
                uri,
                action,
            });
        }
        Ok(scheduled)
    }

    async fn upsert_job(
        &self,
        name: &str,
        schedule: &str,
        uri: &str,
        time_zone: &str,
    ) -> Result<JobAction, DeployError> {
        let job_args = |verb: &str| {
            args(&[
                "scheduler",
                "jobs",
                verb,
                "http",
                name,
                "--location",
                self.target.region.as_str(),
                "--schedule",
                schedule,
                "--uri",
                uri,
                "--http-method",
                "POST",
                "--time-zone",
                time_zone,
            ])
        };

        let created = self.runner.run(GCLOUD, &job_args("create")).await?;
        if created.success {
            return Ok(JobAction::Created);
        }
        warn!(job = name, stderr = %created.stderr, "Create failed, updating existing job");
        self.gcloud(job_args("update")).await?;
        Ok(JobAction::Updated)
    }
}
