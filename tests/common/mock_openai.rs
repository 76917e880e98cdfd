use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use renshuu_backend::openai::OpenAI;

/// What the fake upstream answers with.
#[derive(Debug, Clone)]
pub struct MockOpenAiConfig {
    /// Streamed grading text; each element becomes its own SSE `data:` frame.
    pub grade_chunks: Vec<String>,
    /// How many bytes of the encoded SSE body go into one HTTP chunk.
    pub wire_chunk: usize,
    pub sentence: Value,
    pub hint: String,
    pub pcm_samples: usize,
    /// When set, every endpoint fails with this status.
    pub fail_status: Option<u16>,
    /// When set, the grading stream sends this many content frames, then an
    /// in-stream error frame, then closes.
    pub error_after: Option<usize>,
    /// Close the grading stream right after the last content frame, with no
    /// trailing newline and no `[DONE]`.
    pub unterminated: bool,
}

impl Default for MockOpenAiConfig {
    fn default() -> Self {
        Self {
            grade_chunks: vec![
                "Score: 8".into(),
                "5\nEvaluation: 自然な訳です。\nCorr".into(),
                "ected: 私は学生です。\n--- \n".into(),
                "## 解説\n「学生」".into(),
                "は正しい語です。".into(),
            ],
            wire_chunk: 7,
            sentence: json!({
                "zh": "我喜欢猫。",
                "ja": "猫が好きです。",
                "distractors": ["犬が好きです。", "猫が嫌いです。", "猫が好きでした。"]
            }),
            hint: "「〜が好き」を使いましょう。".into(),
            pcm_samples: 240,
            fail_status: None,
            error_after: None,
            unterminated: false,
        }
    }
}

impl MockOpenAiConfig {
    pub fn fail_status(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn error_after(mut self, frames: usize) -> Self {
        self.error_after = Some(frames);
        self
    }

    pub fn unterminated(mut self) -> Self {
        self.unterminated = true;
        self
    }

    pub fn grade_chunks(mut self, chunks: &[&str]) -> Self {
        self.grade_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[derive(Clone)]
struct MockState {
    config: MockOpenAiConfig,
    captured: Arc<Mutex<Vec<Value>>>,
}

pub struct MockOpenAi {
    pub addr: SocketAddr,
    captured: Arc<Mutex<Vec<Value>>>,
}

impl MockOpenAi {
    pub async fn start(config: MockOpenAiConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let captured = Arc::new(Mutex::new(Vec::new()));
        let state = MockState { config, captured: captured.clone() };

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/audio/speech", post(speech))
            .with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, captured })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn client(&self) -> OpenAI {
        OpenAI::new("test-key", self.base_url()).unwrap()
    }

    /// Request bodies received so far, in order.
    pub fn captured(&self) -> Vec<Value> {
        self.captured.lock().unwrap().clone()
    }
}

fn failure(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": { "message": "mock upstream failure", "type": "server_error" } }))).into_response()
}

async fn chat_completions(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.captured.lock().unwrap().push(body.clone());
    if let Some(status) = state.config.fail_status {
        return failure(status);
    }

    if body["stream"].as_bool() == Some(true) {
        let mut sse = String::new();
        sse.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        let cut = state.config.error_after.unwrap_or(usize::MAX);
        for chunk in state.config.grade_chunks.iter().take(cut) {
            let frame = json!({ "choices": [{ "delta": { "content": chunk } }] });
            sse.push_str(&format!("data: {}\n\n", frame));
        }
        if state.config.unterminated {
            sse.truncate(sse.trim_end_matches('\n').len());
        } else if state.config.error_after.is_some() {
            sse.push_str("data: {\"error\":{\"message\":\"stream interrupted\"}}\n\n");
        } else {
            sse.push_str("data: [DONE]\n\n");
        }

        let bytes = sse.into_bytes();
        let parts: Vec<Result<Bytes, Infallible>> = bytes
            .chunks(state.config.wire_chunk.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(futures_util::stream::iter(parts)),
        )
            .into_response();
    }

    let content = if body["response_format"]["type"] == "json_object" {
        state.config.sentence.to_string()
    } else {
        state.config.hint.clone()
    };
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    }))
    .into_response()
}

async fn speech(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.captured.lock().unwrap().push(body);
    if let Some(status) = state.config.fail_status {
        return failure(status);
    }
    let pcm: Vec<u8> = (0..state.config.pcm_samples)
        .flat_map(|i| ((i as i16) * 64).to_le_bytes())
        .collect();
    ([(header::CONTENT_TYPE, "application/octet-stream")], pcm).into_response()
}
