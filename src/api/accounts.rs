//! Mailbox management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::insights::LimitQuery;
use super::{clamp_limit, db_failure, error_response, pipeline_error_response};
use crate::pipeline::accounts::register_account;
use crate::service::Services;
use crate::store::AccountCredentials;

pub(super) fn account_routes(services: Services) -> Router {
    Router::new()
        .route("/api/accounts", get(list_accounts).post(add_account))
        .route("/api/accounts/{id}", delete(disconnect_account))
        .route("/api/accounts/{id}/purge", delete(purge_account))
        .route("/api/accounts/{id}/emails", get(account_emails))
        .with_state(services)
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid account ID"))
}

fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Account not found")
}

async fn list_accounts(State(services): State<Services>) -> Response {
    match services.db.list_accounts().await {
        Ok(accounts) => Json(json!({"accounts": accounts})).into_response(),
        Err(e) => db_failure(e),
    }
}

/// POST /api/accounts
///
/// Called by the OAuth connect flow with the exchanged tokens.
async fn add_account(
    State(services): State<Services>,
    Json(credentials): Json<AccountCredentials>,
) -> Response {
    match register_account(services.db.as_ref(), &credentials).await {
        Ok(account) => (StatusCode::CREATED, Json(json!({"account": account}))).into_response(),
        Err(e) => pipeline_error_response(e),
    }
}

/// DELETE /api/accounts/{id}: soft disconnect.
async fn disconnect_account(State(services): State<Services>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.db.set_account_active(id, false).await {
        Ok(true) => {
            info!(account_id = %id, "Account disconnected");
            Json(json!({"status": "disconnected"})).into_response()
        }
        Ok(false) => not_found(),
        Err(e) => db_failure(e),
    }
}

/// DELETE /api/accounts/{id}/purge: permanent delete.
async fn purge_account(State(services): State<Services>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.db.delete_account(id).await {
        Ok(true) => {
            info!(account_id = %id, "Account deleted");
            Json(json!({"status": "deleted"})).into_response()
        }
        Ok(false) => not_found(),
        Err(e) => db_failure(e),
    }
}

async fn account_emails(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let account = match services.db.get_account(id).await {
        Ok(Some(account)) => account,
        Ok(None) => return not_found(),
        Err(e) => return db_failure(e),
    };
    match services
        .db
        .processed_emails_for_account(id, clamp_limit(query.limit))
        .await
    {
        Ok(emails) => Json(json!({"account": account, "emails": emails})).into_response(),
        Err(e) => db_failure(e),
    }
}
