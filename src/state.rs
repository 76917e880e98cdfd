//! Application state: in-memory sentence and exercise stores, prompts, OpenAI
//! client, practice history, and the sentence selection policy.
//!
//! The selection policy generates a fresh sentence via OpenAI when available.
//! Otherwise we rotate through the local bank / built-in seeds for the level,
//! and as a last resort insert a hard fallback.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{load_practice_config, PracticeConfig, Prompts, Settings};
use crate::domain::{Exercise, Sentence, SentenceSource};
use crate::history::HistoryStore;
use crate::openai::OpenAI;
use crate::seeds::{hard_fallback_sentence, seed_sentences};

/// Served exercises kept for grading; the oldest are dropped past this.
const EXERCISE_CAP: usize = 1024;

#[derive(Default)]
struct ExerciseStore {
  by_id: HashMap<String, Exercise>,
  order: VecDeque<String>,
}

#[derive(Clone)]
pub struct AppState {
  pub by_id: Arc<RwLock<HashMap<String, Sentence>>>,
  pub by_level: Arc<RwLock<HashMap<String, Vec<String>>>>,
  pub last_by_level: Arc<RwLock<HashMap<String, String>>>,
  exercises: Arc<RwLock<ExerciseStore>>,
  pub openai: Option<OpenAI>,
  pub prompts: Prompts,
  pub history: Arc<HistoryStore>,
  pub default_level: String,
}

impl AppState {
  /// Build state from settings: load config, open history, init OpenAI from env.
  #[instrument(level = "info", skip_all)]
  pub async fn new(settings: &Settings) -> Self {
    let cfg = settings.config_path.as_deref().and_then(load_practice_config);
    let history = HistoryStore::open(settings.history_path.clone(), settings.history_limit).await;

    let openai = OpenAI::from_env();
    if let Some(oa) = &openai {
      info!(target: "renshuu_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, tts_model = %oa.tts_model, "OpenAI enabled.");
    } else {
      info!(target: "renshuu_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local grading.");
    }

    Self::with_parts(settings, cfg, openai, history)
  }

  /// Assemble state from already-built parts; seeds the sentence pools.
  pub fn with_parts(
    settings: &Settings,
    cfg: Option<PracticeConfig>,
    openai: Option<OpenAI>,
    history: HistoryStore,
  ) -> Self {
    let prompts = cfg.as_ref().map(|c| c.prompts.clone()).unwrap_or_default();

    let mut id_map = HashMap::<String, Sentence>::new();
    let mut level_map = HashMap::<String, Vec<String>>::new();

    // Config-bank sentences first, so they win id collisions with seeds.
    if let Some(cfg) = &cfg {
      for sc in &cfg.sentences {
        let id = sc.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let level = sc.level.trim().to_lowercase();
        if sc.zh.trim().is_empty() || sc.ja.trim().is_empty() {
          error!(target: "practice", %id, %level, "Skipping bank item: missing zh or ja.");
          continue;
        }
        if id_map.contains_key(&id) {
          warn!(target: "practice", %id, "Skipping bank item: duplicate id.");
          continue;
        }
        let s = Sentence {
          id: id.clone(),
          level: level.clone(),
          zh: sc.zh.trim().to_string(),
          ja: sc.ja.trim().to_string(),
          distractors: sc.distractors.clone(),
          source: SentenceSource::LocalBank,
        };
        level_map.entry(level).or_default().push(id.clone());
        id_map.insert(id, s);
      }
    }

    // Always insert built-in seeds, but don't overwrite existing ids.
    for s in seed_sentences() {
      if id_map.contains_key(&s.id) {
        continue;
      }
      level_map.entry(s.level.clone()).or_default().push(s.id.clone());
      id_map.insert(s.id.clone(), s);
    }

    let mut count_by_level: HashMap<&str, (usize, usize)> = HashMap::new();
    for s in id_map.values() {
      let entry = count_by_level.entry(s.level.as_str()).or_insert((0, 0));
      match s.source {
        SentenceSource::LocalBank => entry.0 += 1,
        _ => entry.1 += 1,
      }
    }
    for (level, (bank, seed)) in count_by_level {
      info!(target: "practice", %level, local_bank = bank, seed = seed, "Startup sentence inventory");
    }

    Self {
      by_id: Arc::new(RwLock::new(id_map)),
      by_level: Arc::new(RwLock::new(level_map)),
      last_by_level: Arc::new(RwLock::new(HashMap::new())),
      exercises: Arc::new(RwLock::new(ExerciseStore::default())),
      openai,
      prompts,
      history: Arc::new(history),
      default_level: settings.default_level.clone(),
    }
  }

  /// Insert sentence into stores (by_id and by_level).
  #[instrument(level = "debug", skip(self, s), fields(id = %s.id))]
  pub async fn insert_sentence(&self, s: Sentence) {
    let mut by_id = self.by_id.write().await;
    let mut by_level = self.by_level.write().await;
    by_level.entry(s.level.clone()).or_default().push(s.id.clone());
    by_id.insert(s.id.clone(), s);
  }

  /// Selection policy:
  /// 1) generate via OpenAI when available;
  /// 2) otherwise rotate the existing pool for `level`, avoiding the last one served;
  /// 3) otherwise insert a hard fallback.
  #[instrument(level = "info", skip(self), fields(%level))]
  pub async fn choose_sentence(&self, level: &str) -> (Sentence, &'static str) {
    if let Some(oa) = &self.openai {
      match oa.generate_sentence(&self.prompts, level).await {
        Ok(s) => {
          self.insert_sentence(s.clone()).await;
          self.last_by_level.write().await.insert(level.to_string(), s.id.clone());
          info!(target: "practice", %level, chosen = %s.id, source = "openai_generated_new", "Generated fresh sentence");
          return (s, "openai_generated_new");
        }
        Err(e) => {
          error!(target: "practice", %level, error = %e, "OpenAI generation failed; using existing pool");
        }
      }
    }

    let ids = { self.by_level.read().await.get(level).cloned().unwrap_or_default() };
    if !ids.is_empty() {
      let last = { self.last_by_level.read().await.get(level).cloned() };
      let chosen_id = next_in_rotation(&ids, last.as_deref()).to_string();

      if let Some(s) = { self.by_id.read().await.get(&chosen_id).cloned() } {
        self.last_by_level.write().await.insert(level.to_string(), chosen_id.clone());
        info!(target: "practice", %level, chosen = %chosen_id, source = "existing_pool", "Serving existing sentence");
        return (s, "existing_pool");
      }
    }

    let s = hard_fallback_sentence(level.to_string());
    self.insert_sentence(s.clone()).await;
    self.last_by_level.write().await.insert(level.to_string(), s.id.clone());
    warn!(target: "practice", %level, chosen = %s.id, source = "hard_fallback", "Inserted hard fallback sentence");
    (s, "hard_fallback")
  }

  /// Japanese references of other sentences, used to pad choice options when a
  /// sentence comes without distractors.
  pub async fn other_references(&self, exclude_id: &str, level: &str) -> Vec<String> {
    let by_id = self.by_id.read().await;
    let mut same: Vec<String> = Vec::new();
    let mut rest: Vec<String> = Vec::new();
    for s in by_id.values().filter(|s| s.id != exclude_id) {
      if s.level == level { same.push(s.ja.clone()) } else { rest.push(s.ja.clone()) }
    }
    same.sort();
    rest.sort();
    same.extend(rest);
    same
  }

  pub async fn store_exercise(&self, ex: Exercise) {
    let mut store = self.exercises.write().await;
    store.order.push_back(ex.id.clone());
    store.by_id.insert(ex.id.clone(), ex);
    while store.order.len() > EXERCISE_CAP {
      if let Some(old) = store.order.pop_front() {
        store.by_id.remove(&old);
      }
    }
  }

  #[instrument(level = "debug", skip(self), fields(%id))]
  pub async fn get_exercise(&self, id: &str) -> Option<Exercise> {
    self.exercises.read().await.by_id.get(id).cloned()
  }
}

/// The entry after `last` (wrapping), or the first one.
fn next_in_rotation<'a>(ids: &'a [String], last: Option<&str>) -> &'a str {
  let pos = last.and_then(|l| ids.iter().position(|id| id == l));
  match pos {
    Some(i) => &ids[(i + 1) % ids.len()],
    None => &ids[0],
  }
}
