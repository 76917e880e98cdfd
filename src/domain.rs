//! Domain models: sentences, exercise modes/sources, and served exercises.

use serde::{Deserialize, Serialize};

/// How the learner answers an exercise.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseMode {
  /// Free translation of the Chinese sentence into Japanese; graded by the AI.
  #[default]
  Translation,
  /// Pick the right Japanese rendering among shuffled options.
  Choice,
}

impl ExerciseMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      ExerciseMode::Translation => "translation",
      ExerciseMode::Choice => "choice",
    }
  }
}

/// Where did we get the sentence from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SentenceSource {
  LocalBank,   // from user-provided TOML bank
  Generated,   // generated via OpenAI and cached in memory
  Seed,        // built-in seeds (last resort)
}

/// A Chinese prompt sentence with its Japanese reference translation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sentence {
  pub id: String,
  pub level: String,   // free-form (e.g., "n5", "n4")
  pub zh: String,
  pub ja: String,
  /// Plausible but wrong Japanese renderings, used for choice mode.
  #[serde(default)] pub distractors: Vec<String>,
  pub source: SentenceSource,
}

/// A sentence as served to one learner, in one mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exercise {
  pub id: String,
  pub sentence: Sentence,
  pub mode: ExerciseMode,
  /// Shuffled options (choice mode only).
  #[serde(default)] pub choices: Vec<String>,
  /// Index of the reference translation inside `choices`.
  #[serde(default)] pub answer_index: Option<usize>,
}

/// What the learner sent back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
  Translation(String),
  Choice(usize),
}

impl Submission {
  /// Human-readable answer text, resolved against the exercise's options.
  pub fn answer_text(&self, ex: &Exercise) -> String {
    match self {
      Submission::Translation(s) => s.trim().to_string(),
      Submission::Choice(i) => ex.choices.get(*i).cloned().unwrap_or_default(),
    }
  }
}
