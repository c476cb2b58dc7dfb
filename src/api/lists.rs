//! Whitelist and blacklist endpoints. Both lists share one set of handlers,
//! mounted once per list.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{db_failure, error_response};
use crate::pipeline::sender_lists::{ParsedEntry, SenderListParser, add_entries, split_bulk};
use crate::service::Services;
use crate::store::{EntryType, ListKind};

#[derive(Clone)]
struct ListRouteState {
    services: Services,
    list: ListKind,
}

pub(super) fn list_routes(services: Services, list: ListKind) -> Router {
    let base = format!("/api/{}", list.as_str());
    Router::new()
        .route(&base, get(list_entries).post(add_entry))
        .route(&format!("{base}/bulk"), post(bulk_add))
        .route(&format!("{base}/{{id}}"), patch(update_notes).delete(remove_entry))
        .with_state(ListRouteState { services, list })
}

const NOTHING_PARSED: &str = "Could not parse any valid emails or domains from input.";

async fn list_entries(State(state): State<ListRouteState>) -> Response {
    match state.services.db.list_sender_rules(state.list).await {
        Ok(entries) => Json(json!({"list": state.list, "entries": entries})).into_response(),
        Err(e) => db_failure(e),
    }
}

#[derive(Deserialize)]
struct AddRequest {
    value: String,
    #[serde(default)]
    notes: Option<String>,
}

/// POST /api/{list}
///
/// `value` is free-form text; addresses and domains are extracted from it.
async fn add_entry(State(state): State<ListRouteState>, Json(body): Json<AddRequest>) -> Response {
    if body.value.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Please enter an email address or domain.");
    }
    let parser = SenderListParser::new(state.services.llm.clone());
    let entries = parser.parse(&body.value).await;
    store_entries(&state, &entries, body.notes.as_deref()).await
}

#[derive(Deserialize)]
struct BulkRequest {
    values: String,
    /// When set, every comma or newline separated value is taken as this type.
    #[serde(default)]
    entry_type: Option<EntryType>,
    #[serde(default)]
    notes: Option<String>,
}

async fn bulk_add(State(state): State<ListRouteState>, Json(body): Json<BulkRequest>) -> Response {
    if body.values.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Please enter at least one value.");
    }
    let entries = match body.entry_type {
        Some(entry_type) => split_bulk(&body.values, entry_type),
        None => {
            SenderListParser::new(state.services.llm.clone())
                .parse(&body.values)
                .await
        }
    };
    store_entries(&state, &entries, body.notes.as_deref()).await
}

async fn store_entries(
    state: &ListRouteState,
    entries: &[ParsedEntry],
    notes: Option<&str>,
) -> Response {
    if entries.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, NOTHING_PARSED);
    }
    match add_entries(state.services.db.as_ref(), state.list, entries, notes).await {
        Ok(summary) => {
            let status = if summary.added + summary.reactivated > 0 {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(summary)).into_response()
        }
        Err(e) => db_failure(e),
    }
}

#[derive(Deserialize)]
struct NotesRequest {
    #[serde(default)]
    notes: Option<String>,
}

async fn update_notes(
    State(state): State<ListRouteState>,
    Path(id): Path<String>,
    Json(body): Json<NotesRequest>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid entry ID");
    };
    let notes = body.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());
    match state
        .services
        .db
        .update_sender_rule_notes(state.list, id, notes)
        .await
    {
        Ok(Some(rule)) => Json(rule).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Entry not found"),
        Err(e) => db_failure(e),
    }
}

async fn remove_entry(State(state): State<ListRouteState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid entry ID");
    };
    match state.services.db.deactivate_sender_rule(state.list, id).await {
        Ok(true) => {
            info!(list = %state.list, entry_id = %id, "Sender list entry removed");
            Json(json!({"status": "removed"})).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Entry not found"),
        Err(e) => db_failure(e),
    }
}
