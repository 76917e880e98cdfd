//! Minimal OpenAI-compatible client for our use-cases.
//!
//! We call chat.completions in three shapes (plain text, strict JSON object, and
//! a server-sent-event stream of text deltas) plus audio/speech for read-aloud.
//! Calls are instrumented and log model names, latencies, and response sizes
//! (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::{Exercise, ExerciseMode, Sentence, SentenceSource};
use crate::util::{fill_template, is_cjk};

const UA: &str = "renshuu-backend/0.1";

/// Text deltas of a streamed completion, in order.
pub type TextStream = BoxStream<'static, Result<String, OpenAiError>>;

#[derive(Debug, Error)]
pub enum OpenAiError {
  #[error("OpenAI request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("OpenAI HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error("OpenAI stream error: {0}")]
  Upstream(String),
  #[error("JSON parse error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("invalid model output: {0}")]
  Invalid(String),
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  pub tts_model: String,
  pub tts_voice: String,
}

#[derive(Deserialize)]
struct GenSentence {
  zh: String,
  ja: String,
  #[serde(default)]
  distractors: Vec<String>,
}

impl OpenAI {
  /// Client with default models against `base_url` (no trailing slash needed).
  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, OpenAiError> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .timeout(Duration::from_secs(90))
      .build()?;
    Ok(Self {
      client,
      api_key: api_key.into(),
      base_url: base_url.into().trim_end_matches('/').to_string(),
      fast_model: "gpt-4o-mini".into(),
      strong_model: "gpt-4o".into(),
      tts_model: "gpt-4o-mini-tts".into(),
      tts_voice: "alloy".into(),
    })
  }

  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());

    let mut oa = match Self::new(api_key, base_url) {
      Ok(oa) => oa,
      Err(e) => {
        error!(target: "renshuu_backend", error = %e, "Failed to build HTTP client; OpenAI disabled");
        return None;
      }
    };
    if let Ok(m) = std::env::var("OPENAI_FAST_MODEL") { oa.fast_model = m; }
    if let Ok(m) = std::env::var("OPENAI_STRONG_MODEL") { oa.strong_model = m; }
    if let Ok(m) = std::env::var("OPENAI_TTS_MODEL") { oa.tts_model = m; }
    if let Ok(v) = std::env::var("OPENAI_TTS_VOICE") { oa.tts_voice = v; }
    Some(oa)
  }

  /// POST a JSON body and turn non-2xx answers into `OpenAiError::Status`.
  async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, OpenAiError> {
    let url = format!("{}/{}", self.base_url, path);
    let res = self.client.post(&url)
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(body).send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(OpenAiError::Status { status, message });
    }
    Ok(res)
  }

  async fn complete(&self, req: &ChatCompletionRequest) -> Result<String, OpenAiError> {
    let res = self.post_json("chat/completions", req).await?;
    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    Ok(body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default())
  }

  /// Plain-text chat completion. Used for hints.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_plain(&self, model: &str, system: &str, user: &str, temperature: f32) -> Result<String, OpenAiError> {
    let req = ChatCompletionRequest::new(model, system, user, temperature);
    Ok(self.complete(&req).await?.trim().to_string())
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, OpenAiError> {
    let mut req = ChatCompletionRequest::new(model, system, user, temperature);
    req.response_format = Some(ResponseFormat { r#type: "json_object".into() });
    let text = self.complete(&req).await?;
    Ok(serde_json::from_str::<T>(&text)?)
  }

  /// Streamed chat completion. Status errors surface here, before the first
  /// delta; transport errors mid-stream surface as stream items.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_stream(&self, model: &str, system: &str, user: &str, temperature: f32) -> Result<TextStream, OpenAiError> {
    let mut req = ChatCompletionRequest::new(model, system, user, temperature);
    req.stream = Some(true);
    let res = self.post_json("chat/completions", &req).await?;
    let mut bytes = res.bytes_stream();

    let stream = async_stream::try_stream! {
      let mut decoder = SseDecoder::default();
      let mut deltas = 0usize;
      let mut closed = false;
      'read: while !closed {
        let events = match bytes.next().await {
          Some(chunk) => decoder.push(&chunk.map_err(OpenAiError::from)?),
          None => {
            closed = true;
            decoder.flush()
          }
        };
        for event in events {
          match event {
            SseData::Done => break 'read,
            SseData::Payload(data) => {
              if let Some(text) = content_delta(&data)? {
                deltas += 1;
                yield text;
              }
            }
          }
        }
      }
      debug!(target: "renshuu_backend", deltas, "OpenAI stream finished");
    };
    Ok(Box::pin(stream))
  }

  // --- High-level helpers (domain-specialized) ---

  /// Generate a fresh Chinese sentence with its Japanese reference and distractors.
  #[instrument(level = "info", skip(self, prompts), fields(%level, model = %self.strong_model))]
  pub async fn generate_sentence(&self, prompts: &Prompts, level: &str) -> Result<Sentence, OpenAiError> {
    let user = fill_template(&prompts.generate_user_template, &[("level", level)]);
    let start = Instant::now();
    let result = self.chat_json::<GenSentence>(&self.strong_model, &prompts.generate_system, &user, 0.9).await;
    let elapsed = start.elapsed();

    let gen = match result {
      Ok(g) => {
        info!(?elapsed, "Model response received successfully");
        g
      }
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during sentence generation");
        return Err(e);
      }
    };

    let sentence = validate_generated(gen, level)?;
    info!(
      sentence_id = %sentence.id,
      zh_preview = %sentence.zh.chars().take(30).collect::<String>(),
      distractors = sentence.distractors.len(),
      "Sentence successfully generated"
    );
    Ok(sentence)
  }

  /// Stream graded feedback for an answer. `verdict` is the locally decided
  /// correctness for choice mode; translation mode leaves it to the model.
  #[instrument(level = "info", skip(self, prompts, exercise, answer), fields(exercise_id = %exercise.id, mode = exercise.mode.as_str(), answer_len = answer.len()))]
  pub async fn grade_stream(
    &self,
    prompts: &Prompts,
    exercise: &Exercise,
    answer: &str,
    verdict: Option<bool>,
  ) -> Result<TextStream, OpenAiError> {
    let s = &exercise.sentence;
    let (system, user) = match exercise.mode {
      ExerciseMode::Translation => (
        &prompts.grade_system,
        fill_template(&prompts.grade_user_template, &[("zh", &s.zh), ("reference", &s.ja), ("answer", answer)]),
      ),
      ExerciseMode::Choice => {
        let verdict = if verdict.unwrap_or(false) { "correct" } else { "wrong" };
        (
          &prompts.choice_system,
          fill_template(
            &prompts.choice_user_template,
            &[("zh", &s.zh), ("reference", &s.ja), ("answer", answer), ("verdict", verdict)],
          ),
        )
      }
    };
    self.chat_stream(&self.strong_model, system, &user, 0.2).await
  }

  #[instrument(level = "info", skip(self, prompts, sentence), fields(sentence_id = %sentence.id))]
  pub async fn hint(&self, prompts: &Prompts, sentence: &Sentence) -> Result<String, OpenAiError> {
    let user = fill_template(&prompts.hint_user_template, &[("zh", &sentence.zh), ("level", &sentence.level)]);
    self.chat_plain(&self.fast_model, &prompts.hint_system, &user, 0.2).await
  }

  /// Raw 24 kHz mono s16le PCM for `text`.
  #[instrument(level = "info", skip(self, text), fields(text_len = text.len(), model = %self.tts_model))]
  pub async fn speech_pcm(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, OpenAiError> {
    let req = SpeechRequest {
      model: &self.tts_model,
      input: text,
      voice: voice.unwrap_or(&self.tts_voice),
      response_format: "pcm",
    };
    let start = Instant::now();
    let res = self.post_json("audio/speech", &req).await?;
    let bytes = res.bytes().await?;
    info!(elapsed = ?start.elapsed(), bytes = bytes.len(), "Speech synthesized");
    Ok(bytes.to_vec())
  }
}

/// Reject unusable generations; keep at most three distinct wrong options.
fn validate_generated(gen: GenSentence, level: &str) -> Result<Sentence, OpenAiError> {
  let zh = gen.zh.trim().to_string();
  let ja = gen.ja.trim().to_string();
  if zh.is_empty() || ja.is_empty() {
    return Err(OpenAiError::Invalid("empty zh or ja".into()));
  }
  if !zh.chars().any(is_cjk) {
    return Err(OpenAiError::Invalid("zh contains no Han characters".into()));
  }

  let mut distractors: Vec<String> = Vec::new();
  for d in gen.distractors {
    let d = d.trim().to_string();
    if !d.is_empty() && d != ja && !distractors.contains(&d) {
      distractors.push(d);
    }
  }
  distractors.truncate(3);

  Ok(Sentence {
    id: Uuid::new_v4().to_string(),
    level: level.to_string(),
    zh,
    ja,
    distractors,
    source: SentenceSource::Generated,
  })
}

// --- Server-sent events ---

#[derive(Debug, PartialEq)]
enum SseData {
  Payload(String),
  Done,
}

/// Splits a byte stream into `data:` payloads. Network chunks may cut lines
/// (and UTF-8 sequences) anywhere, so bytes are held until a newline arrives.
#[derive(Default)]
struct SseDecoder {
  pending: Vec<u8>,
}

impl SseDecoder {
  fn push(&mut self, chunk: &[u8]) -> Vec<SseData> {
    self.pending.extend_from_slice(chunk);
    let mut out = Vec::new();
    while let Some(nl) = self.pending.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = self.pending.drain(..=nl).collect();
      let line = String::from_utf8_lossy(&line);
      let line = line.trim_end_matches(['\n', '\r']);
      let Some(data) = line.strip_prefix("data:") else { continue };
      let data = data.strip_prefix(' ').unwrap_or(data);
      if data == "[DONE]" {
        out.push(SseData::Done);
      } else if !data.is_empty() {
        out.push(SseData::Payload(data.to_string()));
      }
    }
    out
  }

  /// End of body: a last line without a trailing newline still counts.
  fn flush(&mut self) -> Vec<SseData> {
    if self.pending.is_empty() {
      return Vec::new();
    }
    self.push(b"\n")
  }
}

/// Content of one `chat.completion.chunk`, if any.
fn content_delta(data: &str) -> Result<Option<String>, OpenAiError> {
  let v: serde_json::Value = serde_json::from_str(data)?;
  if let Some(msg) = v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()) {
    return Err(OpenAiError::Upstream(msg.to_string()));
  }
  let chunk: ChatChunk = serde_json::from_value(v)?;
  Ok(chunk
    .choices
    .into_iter()
    .next()
    .and_then(|c| c.delta.content)
    .filter(|t| !t.is_empty()))
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  stream: Option<bool>,
}

impl ChatCompletionRequest {
  fn new(model: &str, system: &str, user: &str, temperature: f32) -> Self {
    Self {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: None,
      stream: None,
    }
  }
}

#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Serialize)]
struct SpeechRequest<'a> {
  model: &'a str,
  input: &'a str,
  voice: &'a str,
  response_format: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatChunk { #[serde(default)] choices: Vec<ChunkChoice> }
#[derive(Deserialize)]
struct ChunkChoice { #[serde(default)] delta: ChunkDelta }
#[derive(Default, Deserialize)]
struct ChunkDelta { #[serde(default)] content: Option<String> }

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
