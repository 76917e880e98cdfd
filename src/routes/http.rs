//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::{header, StatusCode},
  response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse,
  },
  Json,
};
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::error::{ApiError, ApiResult};
use crate::feedback::FeedbackEvent;
use crate::history::{HistoryExport, HistoryFilter};
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, ai_enabled: state.openai.is_some() })
}

#[instrument(level = "info", skip(state), fields(level = ?q.level, mode = q.mode.as_str()))]
pub async fn http_get_exercise(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ExerciseQuery>,
) -> impl IntoResponse {
  let level = q.level.unwrap_or_default();
  let (ex, origin) = choose_exercise(&state, &level, q.mode).await;
  info!(target: "practice", level = %ex.sentence.level, id = %ex.id, %origin, "HTTP exercise served");
  Json(to_out(&ex))
}

#[instrument(level = "info", skip(state, body), fields(%body.exercise_id))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> ApiResult<Json<AnswerOut>> {
  let submission = body.submission()?;
  let outcome = evaluate(&state, &body.exercise_id, submission).await?;
  info!(target: "practice", id = %body.exercise_id, correct = outcome.correct, score = %format!("{:.1}", outcome.score), "HTTP answer evaluated");
  Ok(Json(outcome.into()))
}

fn sse_event(ev: FeedbackEvent) -> Event {
  let (name, data) = match ev {
    FeedbackEvent::Score(s) => ("score", serde_json::json!({ "value": s })),
    FeedbackEvent::Evaluation(t) => ("evaluation", serde_json::json!({ "value": t })),
    FeedbackEvent::Corrected(t) => ("corrected", serde_json::json!({ "value": t })),
    FeedbackEvent::Body(t) => ("delta", serde_json::json!({ "text": t })),
  };
  Event::default().event(name).data(data.to_string())
}

/// Server-sent events: `score`, `evaluation`, `corrected`, `delta`*, then
/// `done` (the full answer result) or `error`.
#[instrument(level = "info", skip(state, body), fields(%body.exercise_id))]
pub async fn http_post_answer_stream(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
  let submission = body.submission()?;
  if state.get_exercise(&body.exercise_id).await.is_none() {
    return Err(ApiError::NotFound(format!("unknown exerciseId: {}", body.exercise_id)));
  }

  let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
  let exercise_id = body.exercise_id;
  tokio::spawn(async move {
    let result = evaluate_with(&state, &exercise_id, submission, |ev| {
      let _ = tx.send(sse_event(ev));
    })
    .await;

    let last = match result {
      Ok(outcome) => {
        let out: AnswerOut = outcome.into();
        match serde_json::to_string(&out) {
          Ok(json) => Event::default().event("done").data(json),
          Err(e) => Event::default().event("error").data(serde_json::json!({ "message": e.to_string() }).to_string()),
        }
      }
      Err(e) => Event::default().event("error").data(serde_json::json!({ "message": e.to_string() }).to_string()),
    };
    let _ = tx.send(last);
  });

  let stream = async_stream::stream! {
    while let Some(ev) = rx.recv().await {
      yield Ok::<_, Infallible>(ev);
    }
  };
  Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[instrument(level = "info", skip(state), fields(%q.exercise_id))]
pub async fn http_get_hint(
  State(state): State<Arc<AppState>>,
  Query(q): Query<HintQuery>,
) -> ApiResult<Json<HintOut>> {
  let text = hint_text(&state, &q.exercise_id).await?;
  info!(target: "practice", id = %q.exercise_id, "HTTP hint served");
  Ok(Json(HintOut { text }))
}

#[instrument(level = "info", skip(body), fields(text_len = body.text.len()))]
pub async fn http_post_pinyin(Json(body): Json<PinyinIn>) -> impl IntoResponse {
  let r = pinyin(&body.text);
  Json(PinyinOut { pinyin: r.pinyin, ruby: r.ruby })
}

#[instrument(level = "info", skip(state, body), fields(text_len = body.text.len()))]
pub async fn http_post_speech(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SpeechIn>,
) -> ApiResult<impl IntoResponse> {
  let wav = speak(&state, &body.text, body.voice.as_deref()).await?;
  Ok(([(header::CONTENT_TYPE, "audio/wav")], wav))
}

// --- History ---

#[instrument(level = "info", skip(state, filter))]
pub async fn http_list_history(
  State(state): State<Arc<AppState>>,
  Query(filter): Query<HistoryFilter>,
) -> impl IntoResponse {
  Json(state.history.list(&filter).await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_history_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.history.stats().await)
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_history_entry(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
  let entry = state
    .history
    .get(&id)
    .await
    .ok_or_else(|| ApiError::NotFound(format!("unknown history entry: {}", id)))?;
  Ok(Json(entry))
}

#[instrument(level = "info", skip(state))]
pub async fn http_export_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let doc = state.history.export().await;
  info!(target: "practice", entries = doc.entries.len(), "History exported");
  (
    [(header::CONTENT_DISPOSITION, "attachment; filename=\"renshuu-history.json\"")],
    Json(doc),
  )
}

#[instrument(level = "info", skip(state, doc), fields(mode = ?q.mode, incoming = doc.entries.len()))]
pub async fn http_import_history(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ImportQuery>,
  Json(doc): Json<HistoryExport>,
) -> ApiResult<impl IntoResponse> {
  let report = state.history.import(doc, q.mode).await?;
  Ok(Json(report))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_history_entry(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> ApiResult<StatusCode> {
  if state.history.delete(&id).await? {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("unknown history entry: {}", id)))
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_clear_history(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
  let deleted = state.history.clear().await?;
  info!(target: "practice", deleted, "History cleared");
  Ok(Json(DeletedOut { deleted }))
}
