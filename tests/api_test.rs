mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};

use common::*;
use renshuu_backend::history::HistoryStore;

async fn new_exercise(app: &axum::Router, query: &str) -> Value {
    let (status, ex) = get_json(app, &format!("/api/v1/exercise{query}")).await;
    assert_eq!(status, StatusCode::OK);
    ex
}

#[tokio::test]
async fn health_reports_ai_disabled_offline() {
    let app = offline_app();
    let (status, json) = get_json(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "ok": true, "ai_enabled": false }));
}

#[tokio::test]
async fn translation_exercise_hides_the_reference() {
    let app = offline_app();
    let ex = new_exercise(&app, "?level=N5").await;

    assert_eq!(ex["level"], "n5");
    assert_eq!(ex["mode"], "translation");
    assert_eq!(ex["source"], "seed");
    assert!(ex.get("choices").is_none());
    assert!(!ex["pinyin"].as_str().unwrap().is_empty());

    let reference = seed_reference(ex["zh"].as_str().unwrap());
    assert!(!ex.to_string().contains(&reference));
}

#[tokio::test]
async fn exact_translation_scores_full_marks_and_lands_in_history() {
    let app = offline_app();
    let ex = new_exercise(&app, "").await;
    let reference = seed_reference(ex["zh"].as_str().unwrap());

    let (status, out) = post_json(
        &app,
        "/api/v1/answer",
        &json!({ "exerciseId": ex["id"], "answer": format!(" {reference} ") }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["correct"], true);
    assert_eq!(out["score"], 100.0);
    assert_eq!(out["grader"], "local");
    assert_eq!(out["expected"], reference.as_str());
    assert!(out["explanationHtml"].as_str().unwrap().contains("<strong>"));

    let history_id = out["historyId"].as_str().unwrap();
    let (status, entry) = get_json(&app, &format!("/api/v1/history/{history_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["exercise_id"], ex["id"]);
    assert_eq!(entry["correct"], true);
}

#[tokio::test]
async fn unrelated_translation_fails() {
    let app = offline_app();
    let ex = new_exercise(&app, "").await;

    let (status, out) =
        post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "answer": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["correct"], false);
    assert_eq!(out["score"], 0.0);
    assert_eq!(out["evaluation"], "日本語で答えてください。");
}

#[tokio::test]
async fn choice_exercise_is_graded_by_index() {
    let app = offline_app();
    let ex = new_exercise(&app, "?mode=choice").await;
    assert_eq!(ex["mode"], "choice");

    let choices: Vec<String> = serde_json::from_value(ex["choices"].clone()).unwrap();
    assert_eq!(choices.len(), 4);
    let reference = seed_reference(ex["zh"].as_str().unwrap());
    let right = choices.iter().position(|c| *c == reference).unwrap();
    let wrong = (right + 1) % choices.len();

    let (_, out) = post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "choice": wrong })).await;
    assert_eq!(out["correct"], false);
    assert_eq!(out["score"], 0.0);

    let (_, out) = post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "choice": right })).await;
    assert_eq!(out["correct"], true);
    assert_eq!(out["score"], 100.0);
}

#[tokio::test]
async fn bad_submissions_are_rejected() {
    let app = offline_app();
    let ex = new_exercise(&app, "?mode=choice").await;

    let (status, err) = post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "choice": 9 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "bad_request");

    let (status, _) = post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "answer": "猫" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, err) = post_json(&app, "/api/v1/answer", &json!({ "exerciseId": "nope", "answer": "x" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn answer_stream_emits_fields_before_body_then_done() {
    let app = offline_app();
    let ex = new_exercise(&app, "").await;
    let reference = seed_reference(ex["zh"].as_str().unwrap());

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/answer/stream")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "exerciseId": ex["id"], "answer": reference }).to_string()))
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/event-stream"));

    let events = parse_sse(&body);
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(&names[..3], ["score", "evaluation", "corrected"]);
    assert!(names.contains(&"delta"));
    assert_eq!(names.last(), Some(&"done"));

    assert_eq!(events[0].1["value"], 100.0);
    assert_eq!(events[2].1["value"], reference.as_str());
    let streamed: String = events
        .iter()
        .filter(|(n, _)| n == "delta")
        .map(|(_, d)| d["text"].as_str().unwrap().to_string())
        .collect();
    let (_, done) = events.last().unwrap();
    assert_eq!(done["explanation"].as_str().unwrap(), streamed);
    assert_eq!(done["correct"], true);
}

#[tokio::test]
async fn answer_stream_unknown_exercise_is_404() {
    let app = offline_app();
    let (status, _) = post_json(&app, "/api/v1/answer/stream", &json!({ "exerciseId": "missing", "answer": "x" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn local_hint_gives_opening_and_length() {
    let app = offline_app();
    let ex = new_exercise(&app, "").await;
    let reference = seed_reference(ex["zh"].as_str().unwrap());
    let opening: String = reference.chars().take(2).collect();

    let (status, hint) = get_json(&app, &format!("/api/v1/hint?exerciseId={}", ex["id"].as_str().unwrap())).await;
    assert_eq!(status, StatusCode::OK);
    let text = hint["text"].as_str().unwrap();
    assert!(text.contains(&opening));
    assert!(text.contains(&reference.chars().count().to_string()));
}

#[tokio::test]
async fn pinyin_endpoint_returns_ruby() {
    let app = offline_app();
    let (status, out) = post_json(&app, "/api/v1/pinyin", &json!({ "text": "你好!" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["pinyin"], "nǐ hǎo!");
    assert_eq!(out["ruby"][0], json!({ "text": "你", "pinyin": "nǐ" }));
    assert_eq!(out["ruby"][2]["pinyin"], Value::Null);
}

#[tokio::test]
async fn speech_without_ai_is_unavailable() {
    let app = offline_app();
    let (status, err) = post_json(&app, "/api/v1/speech", &json!({ "text": "こんにちは" })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err["error"]["code"], "ai_unavailable");

    let (status, _) = post_json(&app, "/api/v1/speech", &json!({ "text": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_filters_stats_and_deletes() {
    let app = offline_app();
    for answer in [None, Some("hello")] {
        let ex = new_exercise(&app, "").await;
        let answer = answer.map(str::to_string).unwrap_or_else(|| seed_reference(ex["zh"].as_str().unwrap()));
        post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "answer": answer })).await;
    }

    let (_, page) = get_json(&app, "/api/v1/history").await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["entries"][0]["user_answer"], "hello");

    let (_, page) = get_json(&app, "/api/v1/history?correct=true").await;
    assert_eq!(page["total"], 1);
    let (_, page) = get_json(&app, "/api/v1/history?minScore=50&mode=translation").await;
    assert_eq!(page["total"], 1);
    let (_, page) = get_json(&app, "/api/v1/history?q=HELLO").await;
    assert_eq!(page["total"], 1);
    let (_, page) = get_json(&app, "/api/v1/history?limit=1&offset=1").await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["entries"].as_array().unwrap().len(), 1);

    let (_, stats) = get_json(&app, "/api/v1/history/stats").await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["correct"], 1);
    assert_eq!(stats["average_score"], 50.0);
    assert_eq!(stats["by_mode"]["translation"]["count"], 2);

    let id = page["entries"][0]["id"].as_str().unwrap().to_string();
    let (status, _) = delete(&app, &format!("/api/v1/history/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = delete(&app, &format!("/api/v1/history/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, out) = delete(&app, "/api/v1/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["deleted"], 1);
}

#[tokio::test]
async fn history_export_imports_into_another_store() {
    let source = offline_app();
    let ex = new_exercise(&source, "").await;
    post_json(&source, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "answer": "猫" })).await;

    let req = Request::builder().uri("/api/v1/history/export").body(Body::empty()).unwrap();
    let (status, headers, body) = send(&source, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().starts_with("attachment"));
    let doc: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["version"], 1);

    let target = offline_app();
    let (status, report) = post_json(&target, "/api/v1/history/import", &doc).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report, json!({ "added": 1, "skipped": 0, "total": 1 }));

    let (_, report) = post_json(&target, "/api/v1/history/import", &doc).await;
    assert_eq!(report, json!({ "added": 0, "skipped": 1, "total": 1 }));

    let (_, report) = post_json(&target, "/api/v1/history/import?mode=replace", &doc).await;
    assert_eq!(report, json!({ "added": 1, "skipped": 0, "total": 1 }));

    let mut future = doc.clone();
    future["version"] = json!(99);
    let (status, err) = post_json(&target, "/api/v1/history/import", &future).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn history_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("history.json");

    let (app, _) = app_with(None, HistoryStore::open(Some(path.clone()), 10).await);
    let ex = new_exercise(&app, "").await;
    post_json(&app, "/api/v1/answer", &json!({ "exerciseId": ex["id"], "answer": "猫" })).await;
    assert!(path.exists());

    let (app, _) = app_with(None, HistoryStore::open(Some(path), 10).await);
    let (_, page) = get_json(&app, "/api/v1/history").await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["entries"][0]["user_answer"], "猫");
}

#[tokio::test]
async fn echoed_answer_is_escaped_in_explanation_html() {
    let app = offline_app();
    let ex = new_exercise(&app, "").await;

    let (_, out) = post_json(
        &app,
        "/api/v1/answer",
        &json!({ "exerciseId": ex["id"], "answer": "<img src=x onerror=alert(1)>" }),
    )
    .await;
    let html = out["explanationHtml"].as_str().unwrap();
    assert!(!html.contains("<img"));
    assert!(html.contains("&lt;img"));
}
