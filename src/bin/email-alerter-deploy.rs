use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use email_alerter::deploy::{DeployTarget, Deployer, ScheduleSettings, SystemRunner};

#[derive(Parser)]
#[command(name = "email-alerter-deploy")]
#[command(about = "Deploy the email alerter to Cloud Run and schedule its jobs", long_about = None)]
struct Cli {
    /// Google Cloud project id
    #[arg(long)]
    project: String,

    #[arg(long, default_value = "us-central1")]
    region: String,

    #[arg(long, default_value = "email-alerter")]
    service: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the image and deploy it to Cloud Run
    Deploy {
        /// Extra environment variables, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
    },

    /// Create or update the check and digest scheduler jobs
    Schedule {
        /// Service URL (looked up from Cloud Run when omitted)
        #[arg(long)]
        url: Option<String>,

        #[arg(long, default_value_t = 15)]
        interval: u32,

        #[arg(long, default_value_t = 8)]
        digest_hour: u32,

        #[arg(long, default_value = "America/New_York")]
        time_zone: String,
    },
}

fn parse_env(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(anyhow!("empty variable name in '{raw}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let target = DeployTarget {
        project_id: cli.project,
        region: cli.region,
        service_name: cli.service,
    };
    let runner = SystemRunner;
    let deployer = Deployer::new(&runner, target);

    match cli.cmd {
        Command::Deploy { env } => {
            let url = deployer.deploy(&env).await.context("Deploy failed")?;
            println!("Deployed: {url}");
        }
        Command::Schedule {
            url,
            interval,
            digest_hour,
            time_zone,
        } => {
            if !(1..=59).contains(&interval) {
                return Err(anyhow!("--interval must be between 1 and 59 minutes"));
            }
            if digest_hour > 23 {
                return Err(anyhow!("--digest-hour must be between 0 and 23"));
            }
            let settings = ScheduleSettings {
                service_url: url,
                check_interval_minutes: interval,
                digest_hour,
                time_zone,
            };
            let jobs = deployer
                .schedule(&settings)
                .await
                .context("Scheduling failed")?;
            for job in jobs {
                println!("{:?} {} ({}) -> {}", job.action, job.name, job.schedule, job.uri);
            }
        }
    }
    Ok(())
}
