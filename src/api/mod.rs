//! HTTP API.
//!
//! JSON endpoints under `/api`: the two job triggers called by the
//! external scheduler, plus accounts, sender lists, stats and feedback.

mod accounts;
mod insights;
mod jobs;
mod lists;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{DatabaseError, JobError, PipelineError};
use crate::service::Services;
use crate::store::ListKind;

/// Default and maximum page sizes for email listings.
const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Build the full API router.
pub fn router(services: Services) -> Router {
    Router::new()
        .merge(jobs::job_routes(services.clone()))
        .merge(insights::insight_routes(services.clone()))
        .merge(accounts::account_routes(services.clone()))
        .merge(lists::list_routes(services.clone(), ListKind::Whitelist))
        .merge(lists::list_routes(services, ListKind::Blacklist))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

/// Job endpoints report failures as `{"success": false, "error": ...}`.
fn job_error_response(e: JobError) -> Response {
    let status = match &e {
        JobError::MissingConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        JobError::Unavailable(_) => StatusCode::BAD_REQUEST,
        JobError::Busy(_) => StatusCode::CONFLICT,
        JobError::Aborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        JobError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "Job failed");
    }
    (status, Json(json!({"success": false, "error": e.to_string()}))).into_response()
}

fn pipeline_error_response(e: PipelineError) -> Response {
    match e {
        PipelineError::InvalidInput(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        e @ PipelineError::AccountLimit { .. } => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        PipelineError::Store(DatabaseError::NotFound { entity, .. }) => {
            error_response(StatusCode::NOT_FOUND, format!("{} not found", capitalize(&entity)))
        }
        e => db_failure(e),
    }
}

fn db_failure(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "Request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
