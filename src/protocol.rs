//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Exercise, ExerciseMode, SentenceSource, Submission};
use crate::error::{ApiError, ApiResult};
use crate::feedback::FeedbackEvent;
use crate::history::{HistoryFilter, HistoryPage};
use crate::logic::Outcome;
use crate::pinyin::RubySegment;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    NewExercise {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        mode: ExerciseMode,
    },
    SubmitAnswer {
        #[serde(rename = "exerciseId")]
        exercise_id: String,
        #[serde(default)]
        answer: Option<String>,
        #[serde(default)]
        choice: Option<usize>,
    },
    Hint {
        #[serde(rename = "exerciseId")]
        exercise_id: String,
    },
    Pinyin {
        text: String,
    },
    Speak {
        text: String,
        #[serde(default)]
        voice: Option<String>,
    },
    History {
        #[serde(flatten)]
        filter: HistoryFilter,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Exercise {
        exercise: ExerciseOut,
    },
    /// One header field of streamed feedback (score / evaluation / corrected).
    FeedbackField {
        field: &'static str,
        value: serde_json::Value,
    },
    /// A slice of the markdown explanation.
    FeedbackDelta {
        text: String,
    },
    AnswerResult {
        #[serde(flatten)]
        outcome: AnswerOut,
    },
    Hint {
        text: String,
    },
    Pinyin {
        text: String,
        pinyin: String,
        ruby: Vec<RubySegment>,
    },
    Speech {
        mime: &'static str,
        #[serde(rename = "audioBase64")]
        audio_base64: String,
    },
    History {
        #[serde(flatten)]
        page: HistoryPage,
    },
    Error {
        message: String,
    },
}

impl ServerWsMessage {
    pub fn from_feedback(ev: FeedbackEvent) -> Self {
        match ev {
            FeedbackEvent::Score(s) => Self::FeedbackField { field: "score", value: serde_json::json!(s) },
            FeedbackEvent::Evaluation(t) => Self::FeedbackField { field: "evaluation", value: t.into() },
            FeedbackEvent::Corrected(t) => Self::FeedbackField { field: "corrected", value: t.into() },
            FeedbackEvent::Body(text) => Self::FeedbackDelta { text },
        }
    }
}

/// DTO used by both WS and HTTP for exercise delivery. Never carries the answer.
#[derive(Debug, Serialize)]
pub struct ExerciseOut {
    pub id: String,
    pub level: String,
    pub mode: ExerciseMode,
    pub source: SentenceSource,
    pub zh: String,
    pub pinyin: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

/// Convert a full `Exercise` (internal) to the public DTO.
pub fn to_out(ex: &Exercise) -> ExerciseOut {
    ExerciseOut {
        id: ex.id.clone(),
        level: ex.sentence.level.clone(),
        mode: ex.mode,
        source: ex.sentence.source,
        zh: ex.sentence.zh.clone(),
        pinyin: crate::pinyin::to_pinyin_diacritics(&ex.sentence.zh),
        choices: ex.choices.clone(),
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct ExerciseQuery {
    pub level: Option<String>,
    #[serde(default)]
    pub mode: ExerciseMode,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "exerciseId")]
    pub exercise_id: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub choice: Option<usize>,
}

impl AnswerIn {
    pub fn submission(&self) -> ApiResult<Submission> {
        to_submission(self.answer.clone(), self.choice)
    }
}

/// Exactly one of `answer` / `choice` must be present.
pub fn to_submission(answer: Option<String>, choice: Option<usize>) -> ApiResult<Submission> {
    match (answer, choice) {
        (Some(a), None) => Ok(Submission::Translation(a)),
        (None, Some(i)) => Ok(Submission::Choice(i)),
        (Some(_), Some(_)) => Err(ApiError::BadRequest("send either 'answer' or 'choice', not both".into())),
        (None, None) => Err(ApiError::BadRequest("missing 'answer' or 'choice'".into())),
    }
}

#[derive(Debug, Serialize)]
pub struct AnswerOut {
    #[serde(rename = "exerciseId")]
    pub exercise_id: String,
    pub correct: bool,
    pub score: f32,
    pub expected: String,
    pub evaluation: String,
    pub corrected: String,
    pub explanation: String,
    #[serde(rename = "explanationHtml")]
    pub explanation_html: String,
    pub grader: &'static str,
    #[serde(rename = "historyId", skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
}

impl From<Outcome> for AnswerOut {
    fn from(o: Outcome) -> Self {
        Self {
            exercise_id: o.exercise_id,
            correct: o.correct,
            score: o.score,
            expected: o.expected,
            evaluation: o.evaluation,
            corrected: o.corrected,
            explanation: o.feedback_markdown,
            explanation_html: o.feedback_html,
            grader: o.grader,
            history_id: o.history_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HintQuery {
    #[serde(rename = "exerciseId")]
    pub exercise_id: String,
}
#[derive(Serialize)]
pub struct HintOut {
    pub text: String,
}

#[derive(Deserialize)]
pub struct PinyinIn {
    pub text: String,
}
#[derive(Serialize)]
pub struct PinyinOut {
    pub pinyin: String,
    pub ruby: Vec<RubySegment>,
}

#[derive(Deserialize)]
pub struct SpeechIn {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    #[serde(default)]
    pub mode: crate::history::ImportMode,
}

#[derive(Serialize)]
pub struct DeletedOut {
    pub deleted: usize,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub ai_enabled: bool,
}
