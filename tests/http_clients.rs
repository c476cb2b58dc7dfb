//! Pushover and Anthropic clients against local stand-ins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Form, Json, Router};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use email_alerter::error::{LlmError, NotifyError};
use email_alerter::llm::anthropic::AnthropicProvider;
use email_alerter::llm::provider::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use email_alerter::notify::pushover::PushoverClient;
use email_alerter::notify::{Notification, Notifier, Priority, Sound};

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{addr}")
}

// ── Pushover ────────────────────────────────────────────────────────

type Forms = Arc<Mutex<Vec<HashMap<String, String>>>>;

async fn pushover_messages(
    State(forms): State<Forms>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let user = form.get("user").cloned().unwrap_or_default();
    forms.lock().unwrap().push(form);
    match user.as_str() {
        "bad-user" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": 0, "user": "invalid", "errors": ["user identifier is invalid"]})),
        )
            .into_response(),
        "busy" => StatusCode::TOO_MANY_REQUESTS.into_response(),
        "down" => StatusCode::BAD_GATEWAY.into_response(),
        _ => Json(json!({"status": 1, "request": "req-42"})).into_response(),
    }
}

async fn pushover(user: &str) -> (PushoverClient, Forms) {
    let forms = Forms::default();
    let app = Router::new()
        .route("/1/messages.json", post(pushover_messages))
        .with_state(forms.clone());
    let base = serve(app).await;
    let client = PushoverClient::new(SecretString::from(user), SecretString::from("app-token"))
        .with_url(format!("{base}/1/messages.json"));
    (client, forms)
}

#[tokio::test]
async fn pushover_delivers_html_alert() {
    let (client, forms) = pushover("user-key").await;
    let notification = Notification::new("Important: Bank", "<b>Subject:</b> Fraud")
        .with_priority(Priority::High, Sound::Siren)
        .html();

    let delivery = client.send(&notification).await.unwrap();

    assert_eq!(delivery.receipt.as_deref(), Some("req-42"));
    let forms = forms.lock().unwrap();
    let form = &forms[0];
    assert_eq!(form["token"], "app-token");
    assert_eq!(form["user"], "user-key");
    assert_eq!(form["title"], "Important: Bank");
    assert_eq!(form["priority"], "1");
    assert_eq!(form["html"], "1");
}

#[tokio::test]
async fn pushover_rejection_carries_errors() {
    let (client, _forms) = pushover("bad-user").await;
    let err = client.send(&Notification::new("t", "m")).await.unwrap_err();
    match err {
        NotifyError::Rejected { reason, .. } => assert_eq!(reason, "user identifier is invalid"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn pushover_transient_failures_are_retryable() {
    let (busy, _) = pushover("busy").await;
    let err = busy.send(&Notification::new("t", "m")).await.unwrap_err();
    assert!(matches!(err, NotifyError::RateLimited { .. }));
    assert!(err.is_retryable());

    let (down, _) = pushover("down").await;
    let err = down.send(&Notification::new("t", "m")).await.unwrap_err();
    assert!(matches!(err, NotifyError::ServerError { status: 502, .. }));
    assert!(err.is_retryable());
}

// ── Anthropic ───────────────────────────────────────────────────────

type Bodies = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

async fn anthropic_messages(
    State(bodies): State<Bodies>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    bodies.lock().unwrap().push((headers, body));
    match key.as_str() {
        "wrong" => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}})),
        )
            .into_response(),
        "limited" => (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")]).into_response(),
        _ => Json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "{\"score\": 0.8,"},
                {"type": "text", "text": " \"reason\": \"bank\"}"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 120, "output_tokens": 18}
        }))
        .into_response(),
    }
}

async fn anthropic(key: &str) -> (AnthropicProvider, Bodies) {
    let bodies = Bodies::default();
    let app = Router::new()
        .route("/v1/messages", post(anthropic_messages))
        .with_state(bodies.clone());
    let base = serve(app).await;
    let provider = AnthropicProvider::new(SecretString::from(key), "claude-3-haiku-20240307")
        .with_url(format!("{base}/v1/messages"));
    (provider, bodies)
}

fn request() -> CompletionRequest {
    CompletionRequest::new(vec![
        ChatMessage::system("Score emails."),
        ChatMessage::user("Subject: Fraud alert"),
    ])
    .with_max_tokens(300)
}

#[tokio::test]
async fn anthropic_completion_joins_text_blocks() {
    let (provider, bodies) = anthropic("sk-ant-test").await;

    let response = provider.complete(request()).await.unwrap();

    assert_eq!(response.content, "{\"score\": 0.8, \"reason\": \"bank\"}");
    assert_eq!(response.input_tokens, 120);
    assert_eq!(response.output_tokens, 18);
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.response_id.as_deref(), Some("msg_01"));

    let bodies = bodies.lock().unwrap();
    let (headers, body) = &bodies[0];
    assert_eq!(headers["anthropic-version"], "2023-06-01");
    assert_eq!(body["model"], "claude-3-haiku-20240307");
    assert_eq!(body["max_tokens"], 300);
    assert_eq!(body["system"], "Score emails.");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["role"], "user");
}

#[tokio::test]
async fn anthropic_auth_failure_is_not_retryable() {
    let (provider, _) = anthropic("wrong").await;
    let err = provider.complete(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::AuthFailed { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn anthropic_rate_limit_reads_retry_after() {
    let (provider, _) = anthropic("limited").await;
    let err = provider.complete(request()).await.unwrap_err();
    match err {
        LlmError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
