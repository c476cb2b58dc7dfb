//! Job triggers: `check-now`, `send-digest` and `test-pushover`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use super::job_error_response;
use crate::error::JobError;
use crate::jobs::JobKind;
use crate::service::Services;

pub(super) fn job_routes(services: Services) -> Router {
    Router::new()
        .route("/api/check-now", post(check_now))
        .route("/api/send-digest", post(send_digest))
        .route("/api/test-pushover", post(test_pushover))
        .with_state(services)
}

/// Run a job on its own task. The handler future is dropped when the client
/// disconnects; the job must still run to completion.
async fn detached<T, F>(job: JobKind, run: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(run).await.unwrap_or_else(|e| {
        Err(JobError::Aborted {
            job,
            reason: e.to_string(),
        })
    })
}

/// POST /api/check-now
async fn check_now(State(services): State<Services>) -> Response {
    match detached(JobKind::Check, async move { services.run_check().await }).await {
        Ok(summary) => Json(json!({"success": true, "summary": summary})).into_response(),
        Err(e) => job_error_response(e),
    }
}

/// POST /api/send-digest
async fn send_digest(State(services): State<Services>) -> Response {
    match detached(JobKind::Digest, async move { services.run_digest().await }).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => job_error_response(e),
    }
}

async fn test_pushover(State(services): State<Services>) -> Response {
    match services.send_test_notification().await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({"success": report.delivered(), "error": report.error})),
        )
            .into_response(),
        Err(e) => job_error_response(e),
    }
}
