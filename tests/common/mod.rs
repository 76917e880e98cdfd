#![allow(dead_code)]

pub mod mock_openai;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use renshuu_backend::config::Settings;
use renshuu_backend::history::HistoryStore;
use renshuu_backend::openai::OpenAI;
use renshuu_backend::seeds::seed_sentences;
use renshuu_backend::{build_router, AppState};

pub fn settings() -> Settings {
    Settings { history_path: None, ..Settings::default() }
}

pub fn app_with(openai: Option<OpenAI>, history: HistoryStore) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::with_parts(&settings(), None, openai, history));
    (build_router(state.clone()), state)
}

/// Router with local grading only and in-memory history.
pub fn offline_app() -> Router {
    app_with(None, HistoryStore::in_memory(50)).0
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn json_or_null(body: &[u8]) -> Value {
    if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body).unwrap()
    }
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    (status, json_or_null(&body))
}

pub async fn post_json(app: &Router, uri: &str, payload: &Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    (status, json_or_null(&body))
}

pub async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().method(Method::DELETE).uri(uri).body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    (status, json_or_null(&body))
}

/// Japanese reference of a built-in seed, looked up by its Chinese prompt.
pub fn seed_reference(zh: &str) -> String {
    seed_sentences()
        .into_iter()
        .find(|s| s.zh == zh)
        .map(|s| s.ja)
        .unwrap_or_else(|| panic!("no seed for {zh}"))
}

/// `(event, data)` pairs from a text/event-stream body.
pub fn parse_sse(body: &[u8]) -> Vec<(String, Value)> {
    let text = String::from_utf8_lossy(body);
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            Some((event?, serde_json::from_str(&data).ok()?))
        })
        .collect()
}
