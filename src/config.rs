//! Configuration: process settings from env, plus an optional TOML file with
//! prompt overrides and a local sentence bank.
//!
//! TOML schema (all sections optional):
//!
//! ```toml
//! [prompts]
//! grade_system = "..."
//!
//! [[sentences]]
//! level = "n5"
//! zh = "我是学生。"
//! ja = "私は学生です。"
//! distractors = ["私は先生です。", "彼は学生です。", "私は学生でした。"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PracticeConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub sentences: Vec<SentenceCfg>,
}

/// Sentence entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct SentenceCfg {
  #[serde(default)] pub id: Option<String>,
  pub level: String,
  pub zh: String,
  pub ja: String,
  #[serde(default)] pub distractors: Vec<String>,
}

/// Prompts used by the OpenAI client. Grading prompts must keep the
/// `Score:` / `Evaluation:` / `Corrected:` header and the `--- ` delimiter line,
/// otherwise feedback falls back to undelimited parsing.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Sentence generation
  pub generate_system: String,
  pub generate_user_template: String,
  // Translation grading (streamed)
  pub grade_system: String,
  pub grade_user_template: String,
  // Multiple-choice explanation (streamed)
  pub choice_system: String,
  pub choice_user_template: String,
  // Hints
  pub hint_system: String,
  pub hint_user_template: String,
}

const FEEDBACK_FORMAT: &str = "Reply in exactly this format:\nScore: <0-100>\nEvaluation: <one short sentence in Japanese>\nCorrected: <the best natural Japanese translation>\n--- \n<markdown explanation in Japanese: grammar points, word choice, nuance. Keep it under 150 words.>";

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generate_system: "You are a Japanese learning content generator for Chinese speakers. Respond ONLY with strict JSON.".into(),
      generate_user_template: "Generate one short, natural Chinese sentence for a learner at JLPT level '{level}' to translate into Japanese. Return JSON with fields: zh (Simplified Chinese), ja (natural Japanese translation), distractors (array of exactly 3 plausible but wrong Japanese translations).".into(),
      grade_system: format!("You are a strict but kind Japanese teacher grading a Chinese speaker's translation into Japanese. {FEEDBACK_FORMAT}"),
      grade_user_template: "Chinese sentence: {zh}\nReference translation: {reference}\nLearner's translation: {answer}".into(),
      choice_system: format!("You are a Japanese teacher explaining a multiple-choice answer to a Chinese speaker. {FEEDBACK_FORMAT}"),
      choice_user_template: "Chinese sentence: {zh}\nCorrect option: {reference}\nLearner picked: {answer}\nThe learner was {verdict}. Explain why the correct option fits and what is wrong with the pick.".into(),
      hint_system: "You are a Japanese learning coach. Keep hints short and do NOT reveal the full translation.".into(),
      hint_user_template: "Chinese sentence: {zh}\nLevel: {level}\nGive ONE concise hint (< 25 words), e.g. a key word or grammar pattern.".into(),
    }
  }
}

/// Process-level settings read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  /// `None` keeps history in memory only.
  pub history_path: Option<PathBuf>,
  pub history_limit: usize,
  pub default_level: String,
  pub config_path: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      port: 3000,
      history_path: Some(PathBuf::from("./data/history.json")),
      history_limit: 200,
      default_level: "n5".into(),
      config_path: None,
    }
  }
}

impl Settings {
  pub fn from_env() -> Self {
    let mut s = Self::default();
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
      s.port = port;
    }
    if let Ok(path) = std::env::var("HISTORY_PATH") {
      s.history_path = if path.trim().is_empty() { None } else { Some(PathBuf::from(path)) };
    }
    if let Some(limit) = std::env::var("HISTORY_LIMIT").ok().and_then(|v| v.parse::<usize>().ok()) {
      s.history_limit = limit.max(1);
    }
    if let Ok(level) = std::env::var("DEFAULT_LEVEL") {
      if !level.trim().is_empty() {
        s.default_level = level.trim().to_lowercase();
      }
    }
    s.config_path = std::env::var("PRACTICE_CONFIG_PATH").ok().map(PathBuf::from);
    s
  }
}

/// Attempt to load `PracticeConfig` from a TOML file. On any parsing/IO error, returns None.
pub fn load_practice_config(path: &Path) -> Option<PracticeConfig> {
  let shown = path.display();
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<PracticeConfig>(&s) {
      Ok(cfg) => {
        info!(target: "renshuu_backend", path = %shown, sentences = cfg.sentences.len(), "Loaded practice config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "renshuu_backend", path = %shown, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "renshuu_backend", path = %shown, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
