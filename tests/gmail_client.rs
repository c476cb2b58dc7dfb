//! Gmail client tests against a local stand-in for the Gmail and OAuth APIs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;

use email_alerter::error::MailError;
use email_alerter::mail::{GmailClient, MailSource};
use email_alerter::store::{Account, AccountCredentials};

#[derive(Clone, Default)]
struct Recorded {
    hits: Arc<Mutex<Vec<String>>>,
    auth: Arc<Mutex<Vec<String>>>,
    token_forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
    /// Mailbox history id; every message fetch advances it, as new mail
    /// arriving during a sync would.
    head: Arc<AtomicU64>,
}

impl Recorded {
    fn hit(&self, what: String, headers: &HeaderMap) {
        self.hits.lock().unwrap().push(what);
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.auth.lock().unwrap().push(auth.to_string());
        }
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

fn raw_message(from: &str, subject: &str, body: &str) -> String {
    let rfc822 = format!(
        "From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\nDate: Mon, 5 Jan 2026 09:30:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    );
    URL_SAFE_NO_PAD.encode(rfc822.as_bytes())
}

async fn list_messages(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Query(q): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let max = q
        .iter()
        .find(|(k, _)| k == "maxResults")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    rec.hit(format!("list max={max}"), &headers);
    Json(json!({ "messages": [{ "id": "m1" }, { "id": "m2" }] }))
}

async fn get_message(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    rec.hit(format!("get {id}"), &headers);
    rec.head.fetch_add(1, Ordering::SeqCst);
    let (labels, from, subject) = match id.as_str() {
        "m1" => (vec!["INBOX", "UNREAD"], "\"Alice Boss\" <Alice@Corp.com>", "Quarterly review"),
        "m2" => (vec!["INBOX", "UNREAD"], "news@letters.io", "Weekly news"),
        "m3" => (vec!["INBOX"], "bob@corp.com", "Already read"),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(json!({
        "id": id,
        "threadId": format!("t-{id}"),
        "labelIds": labels,
        "snippet": "preview",
        "raw": raw_message(from, subject, "Please review the attached numbers."),
    }))
    .into_response()
}

async fn history(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let start = q.get("startHistoryId").cloned().unwrap_or_default();
    let page = q.get("pageToken").cloned();
    match &page {
        Some(page) => rec.hit(format!("history {start} page={page}"), &headers),
        None => rec.hit(format!("history {start}"), &headers),
    }
    let body = match (start.as_str(), page.as_deref()) {
        ("stale", _) => return StatusCode::NOT_FOUND.into_response(),
        ("paged", None) => json!({
            "history": [{ "id": "201", "messagesAdded": [{ "message": { "id": "m1" } }] }],
            "nextPageToken": "p2",
        }),
        ("paged", Some("p2")) => json!({
            "history": [{ "id": "202", "messagesAdded": [{ "message": { "id": "m2" } }] }],
        }),
        _ => json!({
            "history": [
                { "id": "101", "messagesAdded": [{ "message": { "id": "m1" } }, { "message": { "id": "m3" } }] },
                { "id": "102", "messagesAdded": [{ "message": { "id": "m1" } }] },
            ]
        }),
    };
    Json(body).into_response()
}

async fn profile(State(rec): State<Recorded>, headers: HeaderMap) -> impl IntoResponse {
    rec.hit("profile".into(), &headers);
    let head = rec.head.load(Ordering::SeqCst);
    Json(json!({ "emailAddress": "me@example.com", "historyId": head.to_string() }))
}

async fn token(
    State(rec): State<Recorded>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let refresh = form.get("refresh_token").cloned().unwrap_or_default();
    rec.token_forms.lock().unwrap().push(form);
    if refresh == "revoked" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response();
    }
    Json(json!({ "access_token": "new-access", "expires_in": 3599, "token_type": "Bearer" }))
        .into_response()
}

async fn start_stand_in() -> (String, Recorded) {
    let rec = Recorded::default();
    rec.head.store(9001, Ordering::SeqCst);
    let app = Router::new()
        .route("/gmail/messages", get(list_messages))
        .route("/gmail/messages/{id}", get(get_message))
        .route("/gmail/history", get(history))
        .route("/gmail/profile", get(profile))
        .route("/token", post(token))
        .with_state(rec.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (format!("http://{addr}"), rec)
}

fn client(base: &str) -> GmailClient {
    GmailClient::new("client-id", SecretString::from("client-secret"))
        .with_endpoints(format!("{base}/gmail/"), format!("{base}/token"))
}

fn account(refresh_token: &str) -> Account {
    Account::new(&AccountCredentials {
        email: "me@example.com".into(),
        display_name: None,
        access_token: None,
        refresh_token: refresh_token.into(),
        token_expiry: None,
    })
}

#[tokio::test]
async fn first_sync_lists_unread_and_returns_cursor() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let batch = gmail.fetch_new("tok", None, 25).await.unwrap();

    assert_eq!(batch.cursor.as_deref(), Some("9001"));
    assert_eq!(batch.emails.len(), 2);
    let first = &batch.emails[0];
    assert_eq!(first.message_id, "m1");
    assert_eq!(first.sender_email, "alice@corp.com");
    assert_eq!(first.sender_name.as_deref(), Some("Alice Boss"));
    assert_eq!(first.subject, "Quarterly review");
    assert!(first.body_text.contains("attached numbers"));
    assert_eq!(first.thread_id.as_deref(), Some("t-m1"));

    assert_eq!(rec.hits()[..2], ["profile", "list max=25"]);
    assert!(rec.auth.lock().unwrap().iter().all(|a| a == "Bearer tok"));
}

#[tokio::test]
async fn incremental_sync_dedups_and_skips_read_messages() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let batch = gmail.fetch_new("tok", Some("100"), 25).await.unwrap();

    let ids: Vec<_> = batch.emails.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m1"]);
    let hits = rec.hits();
    assert_eq!(hits[..2], ["profile", "history 100"]);
    assert_eq!(hits.iter().filter(|h| *h == "get m1").count(), 1);
    assert!(hits.contains(&"get m3".to_string()));
    assert!(!hits.iter().any(|h| h.starts_with("list")));
}

#[tokio::test]
async fn stale_cursor_falls_back_to_full_fetch() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let batch = gmail.fetch_new("tok", Some("stale"), 10).await.unwrap();

    assert_eq!(batch.emails.len(), 2);
    assert_eq!(batch.cursor.as_deref(), Some("9001"));
    let hits = rec.hits();
    assert_eq!(hits[..3], ["profile", "history stale", "list max=10"]);
}

#[tokio::test]
async fn cursor_is_taken_before_mail_arriving_mid_sync() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let batch = gmail.fetch_new("tok", Some("100"), 25).await.unwrap();

    // Both message fetches advanced the mailbox past the returned cursor, so
    // anything that arrived meanwhile is listed again next cycle.
    assert_eq!(batch.cursor.as_deref(), Some("9001"));
    assert_eq!(rec.head.load(Ordering::SeqCst), 9003);
}

#[tokio::test]
async fn history_follows_page_tokens() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let batch = gmail.fetch_new("tok", Some("paged"), 25).await.unwrap();

    let ids: Vec<_> = batch.emails.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(batch.cursor.as_deref(), Some("9001"));
    assert!(rec.hits().contains(&"history paged page=p2".to_string()));
}

#[tokio::test]
async fn capped_history_resumes_after_last_listed_record() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let batch = gmail.fetch_new("tok", Some("paged"), 1).await.unwrap();

    let ids: Vec<_> = batch.emails.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m1"]);
    assert_eq!(batch.cursor.as_deref(), Some("201"));
    assert!(!rec.hits().contains(&"get m2".to_string()));
}

#[tokio::test]
async fn refresh_posts_refresh_grant() {
    let (base, rec) = start_stand_in().await;
    let gmail = client(&base);

    let token = gmail.refresh_access_token(&account("refresh-1")).await.unwrap();

    assert_eq!(token.token, "new-access");
    assert!(token.expires_at.is_some());
    let forms = rec.token_forms.lock().unwrap();
    assert_eq!(forms[0]["grant_type"], "refresh_token");
    assert_eq!(forms[0]["refresh_token"], "refresh-1");
    assert_eq!(forms[0]["client_id"], "client-id");
}

#[tokio::test]
async fn revoked_refresh_token_is_auth_failure() {
    let (base, _rec) = start_stand_in().await;
    let gmail = client(&base);

    let err = gmail
        .refresh_access_token(&account("revoked"))
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::AuthFailed { ref account, .. } if account == "me@example.com"));
}
