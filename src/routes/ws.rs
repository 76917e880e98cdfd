//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. Most requests get a single JSON reply; answer
//! submissions stream `feedback_field` / `feedback_delta` messages first and
//! finish with `answer_result`.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{info, error, instrument, debug};

use crate::audio::wav_base64;
use crate::domain::Submission;
use crate::feedback::FeedbackEvent;
use crate::protocol::{to_out, to_submission, ClientWsMessage, ServerWsMessage};
use crate::logic::*;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "renshuu_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send_msg(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  socket.send(Message::Text(out)).await
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "renshuu_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(ClientWsMessage::SubmitAnswer { exercise_id, answer, choice }) => {
            match to_submission(answer, choice) {
              Ok(sub) => stream_answer(&mut socket, &state, exercise_id, sub).await,
              Err(e) => Ok(ServerWsMessage::Error { message: e.to_string() }),
            }
          }
          Ok(incoming) => {
            debug!(target: "renshuu_backend", "WS received: {:?}", &incoming);
            Ok(handle_client_ws(incoming, &state).await)
          }
          Err(e) => Ok(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
        };

        let sent = match reply {
          Ok(reply) => send_msg(&mut socket, &reply).await,
          Err(e) => Err(e),
        };
        if let Err(e) = sent {
          error!(target: "renshuu_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "renshuu_backend", "WebSocket disconnected");
}

/// Forward feedback events while grading runs; returns the final message.
#[instrument(level = "info", skip(socket, state, submission))]
async fn stream_answer(
  socket: &mut WebSocket,
  state: &AppState,
  exercise_id: String,
  submission: Submission,
) -> Result<ServerWsMessage, axum::Error> {
  let (tx, mut rx) = mpsc::unbounded_channel::<FeedbackEvent>();
  let eval = evaluate_with(state, &exercise_id, submission, move |ev| {
    let _ = tx.send(ev);
  });
  tokio::pin!(eval);

  let result = loop {
    tokio::select! {
      Some(ev) = rx.recv() => send_msg(socket, &ServerWsMessage::from_feedback(ev)).await?,
      res = &mut eval => break res,
    }
  };
  while let Ok(ev) = rx.try_recv() {
    send_msg(socket, &ServerWsMessage::from_feedback(ev)).await?;
  }

  Ok(match result {
    Ok(outcome) => {
      info!(target: "practice", id = %exercise_id, correct = outcome.correct, "WS submit_answer evaluated");
      ServerWsMessage::AnswerResult { outcome: outcome.into() }
    }
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  })
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::NewExercise { level, mode } => {
      let (ex, origin) = choose_exercise(state, level.as_deref().unwrap_or_default(), mode).await;
      info!(target: "practice", level = %ex.sentence.level, id = %ex.id, %origin, "WS new_exercise served");
      ServerWsMessage::Exercise { exercise: to_out(&ex) }
    }

    ClientWsMessage::Hint { exercise_id } => match hint_text(state, &exercise_id).await {
      Ok(text) => ServerWsMessage::Hint { text },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },

    ClientWsMessage::Pinyin { text } => {
      let r = pinyin(&text);
      ServerWsMessage::Pinyin { text, pinyin: r.pinyin, ruby: r.ruby }
    }

    ClientWsMessage::Speak { text, voice } => match speak(state, &text, voice.as_deref()).await {
      Ok(wav) => ServerWsMessage::Speech { mime: "audio/wav", audio_base64: wav_base64(&wav) },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },

    ClientWsMessage::History { filter } => ServerWsMessage::History { page: state.history.list(&filter).await },

    // Routed to `stream_answer` by the loop.
    ClientWsMessage::SubmitAnswer { .. } => ServerWsMessage::Error { message: "submit_answer must be streamed".into() },
  }
}
