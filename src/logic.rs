//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Serving exercises (translation or multiple choice)
//!   - Grading answers through the streaming feedback parser, with a local
//!     grader when OpenAI is off or fails before the first byte
//!   - Recording graded attempts into history
//!   - Hints, pinyin and read-aloud helpers

use std::collections::HashMap;

use futures_util::StreamExt;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::audio::{pcm16_to_wav, SPEECH_SAMPLE_RATE};
use crate::domain::{Exercise, ExerciseMode, Sentence, Submission};
use crate::error::{ApiError, ApiResult};
use crate::feedback::{compose_feedback, Feedback, FeedbackEvent, FeedbackParser};
use crate::history::HistoryEntry;
use crate::markdown::render_markdown;
use crate::openai::TextStream;
use crate::pinyin::{ruby_segments, to_pinyin_diacritics, RubySegment};
use crate::state::AppState;
use crate::util::{is_cjk, is_kana, normalize_answer, trunc_for_log};

/// Translation scores at or above this count as correct.
pub const PASS_SCORE: f32 = 60.0;

const CHOICE_OPTIONS: usize = 4;
const MAX_SPEECH_CHARS: usize = 400;

/// Final result of one graded attempt.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome {
  pub exercise_id: String,
  pub correct: bool,
  pub score: f32,
  pub expected: String,
  pub evaluation: String,
  pub corrected: String,
  pub feedback_markdown: String,
  pub feedback_html: String,
  /// "openai" or "local".
  pub grader: &'static str,
  pub history_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PinyinResult {
  pub pinyin: String,
  pub ruby: Vec<RubySegment>,
}

/// Serve a new exercise for `level` in `mode`.
#[instrument(level = "info", skip(state), fields(%level, mode = mode.as_str()))]
pub async fn choose_exercise(state: &AppState, level: &str, mode: ExerciseMode) -> (Exercise, &'static str) {
  let level = level.trim().to_lowercase();
  let level = if level.is_empty() { state.default_level.clone() } else { level };

  let (sentence, origin) = state.choose_sentence(&level).await;
  let pool = match mode {
    ExerciseMode::Choice if sentence.distractors.len() < CHOICE_OPTIONS - 1 => {
      state.other_references(&sentence.id, &sentence.level).await
    }
    _ => Vec::new(),
  };
  let ex = build_exercise(sentence, mode, &pool, &mut rand::thread_rng());
  state.store_exercise(ex.clone()).await;
  (ex, origin)
}

/// Shape a sentence into an exercise. Choice mode takes the reference plus up
/// to three wrong options (own distractors first, then `pool`) and shuffles.
pub fn build_exercise<R: Rng + ?Sized>(sentence: Sentence, mode: ExerciseMode, pool: &[String], rng: &mut R) -> Exercise {
  let id = Uuid::new_v4().to_string();
  if mode == ExerciseMode::Translation {
    return Exercise { id, sentence, mode, choices: Vec::new(), answer_index: None };
  }

  let mut wrong: Vec<String> = Vec::with_capacity(CHOICE_OPTIONS - 1);
  for cand in sentence.distractors.iter().chain(pool.iter()) {
    if wrong.len() == CHOICE_OPTIONS - 1 {
      break;
    }
    if *cand != sentence.ja && !wrong.contains(cand) {
      wrong.push(cand.clone());
    }
  }

  let mut choices = wrong;
  choices.push(sentence.ja.clone());
  choices.shuffle(rng);
  let answer_index = choices.iter().position(|c| *c == sentence.ja);
  Exercise { id, sentence, mode, choices, answer_index }
}

fn validate_submission(ex: &Exercise, submission: &Submission) -> ApiResult<()> {
  match (ex.mode, submission) {
    (ExerciseMode::Translation, Submission::Translation(s)) if s.trim().is_empty() => {
      Err(ApiError::BadRequest("answer is empty".into()))
    }
    (ExerciseMode::Translation, Submission::Translation(_)) => Ok(()),
    (ExerciseMode::Choice, Submission::Choice(i)) if *i >= ex.choices.len() => {
      Err(ApiError::BadRequest(format!("choice {} out of range (0..{})", i, ex.choices.len())))
    }
    (ExerciseMode::Choice, Submission::Choice(_)) => Ok(()),
    (mode, _) => Err(ApiError::BadRequest(format!("submission does not match exercise mode '{}'", mode.as_str()))),
  }
}

/// Grade a submission, forwarding every parsed feedback event to `emit` as it
/// arrives, then record the attempt in history.
#[instrument(level = "info", skip(state, submission, emit), fields(%exercise_id))]
pub async fn evaluate_with<F>(
  state: &AppState,
  exercise_id: &str,
  submission: Submission,
  mut emit: F,
) -> ApiResult<Outcome>
where
  F: FnMut(FeedbackEvent) + Send,
{
  let ex = state
    .get_exercise(exercise_id)
    .await
    .ok_or_else(|| ApiError::NotFound(format!("unknown exerciseId: {}", exercise_id)))?;
  validate_submission(&ex, &submission)?;

  let answer = submission.answer_text(&ex);
  let verdict = match submission {
    Submission::Choice(i) => Some(Some(i) == ex.answer_index),
    Submission::Translation(_) => None,
  };
  let local_score = verdict.map(|ok| if ok { 100.0 } else { 0.0 });

  // Choice-mode correctness is decided here, not by the model.
  let mut forward = |ev: FeedbackEvent| match (ev, local_score) {
    (FeedbackEvent::Score(_), Some(s)) => emit(FeedbackEvent::Score(s)),
    (ev, _) => emit(ev),
  };

  let mut grader = "local";
  let mut stream: TextStream = local_stream(&ex, &answer, verdict);
  if let Some(oa) = &state.openai {
    match oa.grade_stream(&state.prompts, &ex, &answer, verdict).await {
      Ok(s) => {
        stream = s;
        grader = "openai";
      }
      Err(e) => error!(target: "practice", id = %ex.id, error = %e, "OpenAI grading failed; using local grader."),
    }
  }

  let mut parser = FeedbackParser::new();
  let mut received = 0usize;
  while let Some(item) = stream.next().await {
    match item {
      Ok(chunk) => {
        received += chunk.len();
        for ev in parser.push(&chunk) {
          forward(ev);
        }
      }
      Err(e) if received == 0 => {
        error!(target: "practice", id = %ex.id, error = %e, "Grading stream failed before first byte; using local grader.");
        grader = "local";
        stream = local_stream(&ex, &answer, verdict);
      }
      Err(e) => {
        warn!(target: "practice", id = %ex.id, error = %e, received, "Grading stream broke; keeping partial feedback.");
        break;
      }
    }
  }
  let (tail, feedback) = parser.finish();
  for ev in tail {
    forward(ev);
  }

  let outcome = settle(&ex, &answer, local_score, feedback, grader);
  let history_id = record(state, &ex, &answer, &outcome).await;
  info!(target: "practice", id = %ex.id, correct = outcome.correct, score = %format!("{:.1}", outcome.score), grader, "Answer evaluated");
  Ok(Outcome { history_id, ..outcome })
}

/// Same as [`evaluate_with`], discarding intermediate events.
pub async fn evaluate(state: &AppState, exercise_id: &str, submission: Submission) -> ApiResult<Outcome> {
  evaluate_with(state, exercise_id, submission, |_| {}).await
}

/// Combine parsed feedback with locally known facts into the final outcome.
fn settle(ex: &Exercise, answer: &str, local_score: Option<f32>, feedback: Feedback, grader: &'static str) -> Outcome {
  let score = local_score
    .or(feedback.score)
    .unwrap_or_else(|| local_translation_score(answer, &ex.sentence.ja));
  let correct = match local_score {
    Some(s) => s >= 100.0,
    None => score >= PASS_SCORE,
  };
  let expected = ex.sentence.ja.clone();

  Outcome {
    exercise_id: ex.id.clone(),
    correct,
    score,
    evaluation: feedback.evaluation.unwrap_or_default(),
    corrected: feedback.corrected.unwrap_or_else(|| expected.clone()),
    feedback_html: render_markdown(&feedback.body_markdown),
    feedback_markdown: feedback.body_markdown,
    expected,
    grader,
    history_id: None,
  }
}

async fn record(state: &AppState, ex: &Exercise, answer: &str, o: &Outcome) -> Option<String> {
  let entry = HistoryEntry {
    id: Uuid::new_v4().to_string(),
    created_at: chrono::Utc::now(),
    exercise_id: ex.id.clone(),
    mode: ex.mode,
    level: ex.sentence.level.clone(),
    prompt_zh: ex.sentence.zh.clone(),
    reference_ja: ex.sentence.ja.clone(),
    user_answer: answer.to_string(),
    correct: o.correct,
    score: o.score,
    evaluation: o.evaluation.clone(),
    corrected: o.corrected.clone(),
    feedback_markdown: o.feedback_markdown.clone(),
  };
  let id = entry.id.clone();
  match state.history.append(entry).await {
    Ok(()) => Some(id),
    Err(e) => {
      error!(target: "practice", exercise_id = %ex.id, error = %e, "Failed to record history entry");
      None
    }
  }
}

// -------- Local grader --------

/// Local feedback in the same wire format the model produces, as a one-chunk stream.
fn local_stream(ex: &Exercise, answer: &str, verdict: Option<bool>) -> TextStream {
  let text = match verdict {
    Some(ok) => local_choice_feedback(&ex.sentence, answer, ok),
    None => local_translation_feedback(&ex.sentence, answer),
  };
  Box::pin(futures_util::stream::iter(vec![Ok(text)]))
}

/// Character-overlap F1 against the reference, 100 only for a normalized
/// exact match.
pub fn local_translation_score(answer: &str, reference: &str) -> f32 {
  let a = normalize_answer(answer);
  let r = normalize_answer(reference);
  if a.is_empty() || r.is_empty() {
    return 0.0;
  }
  if a == r {
    return 100.0;
  }
  if !a.chars().any(|c| is_kana(c) || is_cjk(c)) {
    return 0.0;
  }

  let mut bag: HashMap<char, usize> = HashMap::new();
  for c in r.chars() {
    *bag.entry(c).or_default() += 1;
  }
  let mut common = 0usize;
  for c in a.chars() {
    if let Some(n) = bag.get_mut(&c).filter(|n| **n > 0) {
      *n -= 1;
      common += 1;
    }
  }
  let precision = common as f32 / a.chars().count() as f32;
  let recall = common as f32 / r.chars().count() as f32;
  if precision + recall == 0.0 {
    return 0.0;
  }
  let f1 = 2.0 * precision * recall / (precision + recall);
  (f1 * 95.0).round()
}

fn local_translation_feedback(s: &Sentence, answer: &str) -> String {
  let score = local_translation_score(answer, &s.ja);
  let evaluation = if !answer.chars().any(|c| is_kana(c) || is_cjk(c)) {
    "日本語で答えてください。"
  } else if score >= 100.0 {
    "正解です。参考訳と一致しています。"
  } else if score >= 80.0 {
    "ほぼ正解です。細かい違いを確認しましょう。"
  } else if score >= PASS_SCORE {
    "意味は通じますが、参考訳と違う部分があります。"
  } else {
    "参考訳と大きく異なります。"
  };
  let body = format!(
    "**原文**: {}\n\n**参考訳**: {}\n\n**あなたの解答**: {}\n\n_AI 採点が利用できないため、参考訳との文字の一致度で採点しました。_",
    s.zh, s.ja, answer
  );
  compose_feedback(score, evaluation, &s.ja, &body)
}

fn local_choice_feedback(s: &Sentence, picked: &str, ok: bool) -> String {
  let (score, evaluation) = if ok {
    (100.0, "正解です。".to_string())
  } else {
    (0.0, format!("不正解です。正解は「{}」です。", s.ja))
  };
  let body = if ok {
    format!("**原文**: {}\n\n「{}」が原文の意味を正しく表しています。", s.zh, s.ja)
  } else {
    format!(
      "**原文**: {}\n\n- 選んだ答え: {}\n- 正解: {}\n\n正解と見比べて、時制・主語・助詞の違いを確認しましょう。",
      s.zh, picked, s.ja
    )
  };
  compose_feedback(score, &evaluation, &s.ja, &body)
}

// -------- Hints, pinyin, speech --------

#[instrument(level = "info", skip(state), fields(%exercise_id))]
pub async fn hint_text(state: &AppState, exercise_id: &str) -> ApiResult<String> {
  let ex = state
    .get_exercise(exercise_id)
    .await
    .ok_or_else(|| ApiError::NotFound(format!("unknown exerciseId: {}", exercise_id)))?;

  if let Some(oa) = &state.openai {
    match oa.hint(&state.prompts, &ex.sentence).await {
      Ok(t) if !t.is_empty() => return Ok(t),
      Ok(_) => warn!(target: "practice", id = %ex.id, "OpenAI hint was empty; using local hint."),
      Err(e) => error!(target: "practice", id = %ex.id, error = %e, "OpenAI hint failed; using local hint."),
    }
  }
  Ok(local_hint(&ex.sentence))
}

fn local_hint(s: &Sentence) -> String {
  let total = s.ja.chars().count();
  let opening: String = s.ja.chars().take(2).collect();
  format!("「{}…」で始まります（全{}文字）。", opening, total)
}

pub fn pinyin(text: &str) -> PinyinResult {
  let p = to_pinyin_diacritics(text);
  debug!(target: "renshuu_backend", text = %trunc_for_log(text, 40), "pinyin conversion");
  PinyinResult { pinyin: p, ruby: ruby_segments(text) }
}

/// Read `text` aloud; returns a WAV file.
#[instrument(level = "info", skip(state, text), fields(text_len = text.len()))]
pub async fn speak(state: &AppState, text: &str, voice: Option<&str>) -> ApiResult<Vec<u8>> {
  let text = text.trim();
  if text.is_empty() {
    return Err(ApiError::BadRequest("text is empty".into()));
  }
  if text.chars().count() > MAX_SPEECH_CHARS {
    return Err(ApiError::BadRequest(format!("text longer than {} characters", MAX_SPEECH_CHARS)));
  }
  let oa = state
    .openai
    .as_ref()
    .ok_or_else(|| ApiError::AiUnavailable("speech requires OPENAI_API_KEY".into()))?;

  let pcm = oa.speech_pcm(text, voice).await?;
  Ok(pcm16_to_wav(&pcm, SPEECH_SAMPLE_RATE, 1)?)
}
