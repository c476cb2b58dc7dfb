//! Read-side endpoints: health, stats, recent emails, digest and feedback.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{clamp_limit, db_failure, error_response, pipeline_error_response};
use crate::pipeline::feedback::record_feedback;
use crate::service::Services;
use crate::store::FeedbackType;

const MAX_PATTERNS: usize = 200;

pub(super) fn insight_routes(services: Services) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/recent-emails", get(recent_emails))
        .route("/api/digest-stats", get(digest_stats))
        .route("/api/feedback/{email_id}", post(submit_feedback))
        .route("/api/learned-patterns", get(learned_patterns))
        .route("/api/feedback-stats", get(feedback_stats))
        .with_state(services)
}

#[derive(Deserialize)]
pub(super) struct LimitQuery {
    pub limit: Option<usize>,
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn stats(State(services): State<Services>) -> Response {
    let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
    match services.db.email_stats(day_start).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => db_failure(e),
    }
}

/// GET /api/recent-emails?limit=N
async fn recent_emails(
    State(services): State<Services>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match services
        .db
        .recent_processed_emails(clamp_limit(query.limit))
        .await
    {
        Ok(emails) => Json(json!({"emails": emails})).into_response(),
        Err(e) => db_failure(e),
    }
}

async fn digest_stats(State(services): State<Services>) -> Response {
    let digest = &services.config.digest;
    match services.db.digest_stats().await {
        Ok(stats) => Json(json!({
            "pending_digest": stats.pending_digest,
            "total_digested": stats.total_digested,
            "digest_enabled": digest.enabled,
            "digest_hour": digest.hour,
            "digest_threshold_low": digest.threshold_low,
            "digest_threshold_high": digest.threshold_high,
        }))
        .into_response(),
        Err(e) => db_failure(e),
    }
}

#[derive(Deserialize)]
struct FeedbackQuery {
    #[serde(rename = "type")]
    feedback_type: Option<String>,
}

/// POST /api/feedback/{email_id}?type=important|not_important
///
/// Defaults to `not_important` when no type is given.
async fn submit_feedback(
    State(services): State<Services>,
    Path(email_id): Path<String>,
    Query(query): Query<FeedbackQuery>,
) -> Response {
    let Ok(email_id) = Uuid::parse_str(&email_id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid email ID");
    };
    let raw = query.feedback_type.as_deref().unwrap_or("not_important");
    let Ok(feedback) = raw.parse::<FeedbackType>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "Invalid feedback type. Use 'not_important' or 'important'",
            })),
        )
            .into_response();
    };

    match record_feedback(services.db.as_ref(), email_id, feedback).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "message": format!(
                "Feedback recorded. Future emails from {} will be adjusted.",
                outcome.sender
            ),
            "feedback_type": outcome.feedback_type,
            "sender_adjustment": outcome.total_adjustment,
        }))
        .into_response(),
        Err(e) => pipeline_error_response(e),
    }
}

async fn learned_patterns(State(services): State<Services>) -> Response {
    match services.db.list_learned_patterns(MAX_PATTERNS).await {
        Ok(patterns) => Json(json!({"patterns": patterns})).into_response(),
        Err(e) => db_failure(e),
    }
}

async fn feedback_stats(State(services): State<Services>) -> Response {
    match services.db.feedback_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => db_failure(e),
    }
}
