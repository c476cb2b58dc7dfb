use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use email_alerter::api;
use email_alerter::config::AppConfig;
use email_alerter::error::Result;
use email_alerter::scheduler::spawn_scheduler;
use email_alerter::service::Services;
use email_alerter::store::{Database, LibSqlBackend};

const DEFAULT_DB_PATH: &str = "./data/email-alerter.db";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize tracing: stderr always, plus a daily file when LOG_DIR is set.
    let file_layer = config.log_dir.as_deref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "email-alerter.log");
        tracing_appender::non_blocking(appender)
    });
    let (file_writer, _log_guard) = match file_layer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_writer.map(|w| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(w)
        }))
        .init();

    eprintln!("📬 Email Alerter v{}", env!("CARGO_PKG_VERSION"));

    let missing = config.missing_required();
    if !missing.is_empty() {
        tracing::warn!(
            missing = %missing.join(", "),
            "Configuration incomplete; check runs will fail until these are set"
        );
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db_url = config
        .database_url
        .clone()
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    let auth_token = config
        .database_auth_token
        .as_ref()
        .map(|t| t.expose_secret().to_string());
    let db: Arc<dyn Database> = match LibSqlBackend::open(&db_url, auth_token.as_deref()).await {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            eprintln!("Error: Failed to open database at {db_url}: {e}");
            std::process::exit(1);
        }
    };
    eprintln!("   Database: {db_url}");

    let port = config.port;
    let scheduler_enabled = config.scheduler_enabled;
    let services = Services::from_config(config, db);

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = if scheduler_enabled {
        let (handle, shutdown) = spawn_scheduler(services.clone())?;
        eprintln!("   Scheduler: enabled");
        Some((handle, shutdown))
    } else {
        eprintln!("   Scheduler: disabled (trigger jobs over HTTP)");
        None
    };

    // ── HTTP ─────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    eprintln!("   API: http://0.0.0.0:{port}/api/health\n");
    tracing::info!(port, "HTTP server listening");

    axum::serve(listener, api::router(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some((handle, shutdown)) = scheduler {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        let _ = handle.await;
    }

    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM (what Cloud Run sends before stopping
/// an instance).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM received"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown requested");
}
