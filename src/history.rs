//! Practice history: graded attempts, newest first, capped by truncation.
//!
//! Persisted as a single pretty-printed JSON array. Writes go to a sibling temp
//! file followed by a rename so a crash never leaves half a file behind. A
//! missing file starts empty; a corrupt one is logged and also starts empty.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::ExerciseMode;

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum HistoryError {
  #[error("history I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("history JSON invalid: {0}")]
  Json(#[from] serde_json::Error),
  #[error("unsupported history export version {0}")]
  UnsupportedVersion(u32),
}

/// One graded attempt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
  pub id: String,
  pub created_at: DateTime<Utc>,
  pub exercise_id: String,
  pub mode: ExerciseMode,
  pub level: String,
  pub prompt_zh: String,
  pub reference_ja: String,
  pub user_answer: String,
  pub correct: bool,
  pub score: f32,
  #[serde(default)] pub evaluation: String,
  #[serde(default)] pub corrected: String,
  #[serde(default)] pub feedback_markdown: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryFilter {
  pub mode: Option<ExerciseMode>,
  pub level: Option<String>,
  pub min_score: Option<f32>,
  pub max_score: Option<f32>,
  pub correct: Option<bool>,
  /// Case-insensitive substring over prompt, answer, reference and correction.
  pub q: Option<String>,
  pub offset: usize,
  pub limit: Option<usize>,
}

impl HistoryFilter {
  fn matches(&self, e: &HistoryEntry, needle: Option<&str>) -> bool {
    if self.mode.is_some_and(|m| m != e.mode) {
      return false;
    }
    if let Some(level) = &self.level {
      if !level.eq_ignore_ascii_case(&e.level) {
        return false;
      }
    }
    if self.min_score.is_some_and(|min| e.score < min) {
      return false;
    }
    if self.max_score.is_some_and(|max| e.score > max) {
      return false;
    }
    if self.correct.is_some_and(|c| c != e.correct) {
      return false;
    }
    if let Some(needle) = needle {
      let hay = [&e.prompt_zh, &e.user_answer, &e.reference_ja, &e.corrected];
      if !hay.iter().any(|h| h.to_lowercase().contains(needle)) {
        return false;
      }
    }
    true
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryPage {
  /// Number of entries matching the filter, before offset/limit.
  pub total: usize,
  pub entries: Vec<HistoryEntry>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ModeStats {
  pub count: usize,
  pub average_score: f32,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct HistoryStats {
  pub total: usize,
  pub correct: usize,
  pub average_score: f32,
  pub by_mode: BTreeMap<String, ModeStats>,
}

/// Portable export document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryExport {
  pub version: u32,
  pub exported_at: DateTime<Utc>,
  pub entries: Vec<HistoryEntry>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
  #[default]
  Merge,
  Replace,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ImportReport {
  /// Imported entries still present after the cap was applied.
  pub added: usize,
  /// Entries whose id was already present (or repeated in the document).
  pub skipped: usize,
  pub total: usize,
}

pub struct HistoryStore {
  path: Option<PathBuf>,
  limit: usize,
  entries: RwLock<Vec<HistoryEntry>>,
}

fn newest_first(entries: &mut Vec<HistoryEntry>, limit: usize) {
  entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
  entries.truncate(limit);
}

impl HistoryStore {
  pub fn in_memory(limit: usize) -> Self {
    Self { path: None, limit: limit.max(1), entries: RwLock::new(Vec::new()) }
  }

  /// Open the store, loading `path` if it exists.
  #[instrument(level = "info", skip_all, fields(path = ?path, limit = limit))]
  pub async fn open(path: Option<PathBuf>, limit: usize) -> Self {
    let limit = limit.max(1);
    let mut entries = match &path {
      Some(p) => load_file(p).await,
      None => Vec::new(),
    };
    newest_first(&mut entries, limit);
    info!(target: "practice", loaded = entries.len(), persistent = path.is_some(), "History store ready");
    Self { path, limit, entries: RwLock::new(entries) }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  #[instrument(level = "debug", skip(self, entry), fields(id = %entry.id))]
  pub async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
    let mut entries = self.entries.write().await;
    let mut next = Vec::with_capacity(entries.len() + 1);
    next.push(entry);
    next.extend(entries.iter().take(self.limit - 1).cloned());
    self.persist(&next).await?;
    *entries = next;
    Ok(())
  }

  pub async fn list(&self, filter: &HistoryFilter) -> HistoryPage {
    let entries = self.entries.read().await;
    let needle = filter
      .q
      .as_deref()
      .map(|q| q.trim().to_lowercase())
      .filter(|q| !q.is_empty());

    let matching: Vec<&HistoryEntry> =
      entries.iter().filter(|e| filter.matches(e, needle.as_deref())).collect();
    let total = matching.len();
    let page = matching
      .into_iter()
      .skip(filter.offset)
      .take(filter.limit.unwrap_or(usize::MAX))
      .cloned()
      .collect();
    HistoryPage { total, entries: page }
  }

  pub async fn get(&self, id: &str) -> Option<HistoryEntry> {
    self.entries.read().await.iter().find(|e| e.id == id).cloned()
  }

  /// Returns whether an entry was removed.
  #[instrument(level = "debug", skip(self))]
  pub async fn delete(&self, id: &str) -> Result<bool, HistoryError> {
    let mut entries = self.entries.write().await;
    if !entries.iter().any(|e| e.id == id) {
      return Ok(false);
    }
    let next: Vec<HistoryEntry> = entries.iter().filter(|e| e.id != id).cloned().collect();
    self.persist(&next).await?;
    *entries = next;
    Ok(true)
  }

  /// Returns the number of removed entries.
  #[instrument(level = "info", skip(self))]
  pub async fn clear(&self) -> Result<usize, HistoryError> {
    let mut entries = self.entries.write().await;
    self.persist(&[]).await?;
    let removed = entries.len();
    entries.clear();
    Ok(removed)
  }

  pub async fn stats(&self) -> HistoryStats {
    let entries = self.entries.read().await;
    let mut stats = HistoryStats { total: entries.len(), ..Default::default() };
    if entries.is_empty() {
      return stats;
    }

    let mut sums: BTreeMap<String, f32> = BTreeMap::new();
    let mut sum = 0.0;
    for e in entries.iter() {
      sum += e.score;
      if e.correct {
        stats.correct += 1;
      }
      stats.by_mode.entry(e.mode.as_str().to_string()).or_default().count += 1;
      *sums.entry(e.mode.as_str().to_string()).or_default() += e.score;
    }
    stats.average_score = sum / entries.len() as f32;
    for (mode, s) in stats.by_mode.iter_mut() {
      s.average_score = sums.get(mode).copied().unwrap_or_default() / s.count as f32;
    }
    stats
  }

  pub async fn export(&self) -> HistoryExport {
    HistoryExport {
      version: EXPORT_VERSION,
      exported_at: Utc::now(),
      entries: self.entries.read().await.clone(),
    }
  }

  #[instrument(level = "info", skip(self, doc), fields(version = doc.version, incoming = doc.entries.len(), ?mode))]
  pub async fn import(&self, doc: HistoryExport, mode: ImportMode) -> Result<ImportReport, HistoryError> {
    if doc.version != EXPORT_VERSION {
      return Err(HistoryError::UnsupportedVersion(doc.version));
    }

    let mut entries = self.entries.write().await;
    let mut seen: HashSet<String> = match mode {
      ImportMode::Merge => entries.iter().map(|e| e.id.clone()).collect(),
      ImportMode::Replace => HashSet::new(),
    };

    let mut incoming = Vec::with_capacity(doc.entries.len());
    let mut skipped = 0;
    for e in doc.entries {
      if seen.insert(e.id.clone()) {
        incoming.push(e);
      } else {
        skipped += 1;
      }
    }
    let incoming_ids: HashSet<String> = incoming.iter().map(|e| e.id.clone()).collect();

    let mut next = match mode {
      ImportMode::Merge => entries.clone(),
      ImportMode::Replace => Vec::new(),
    };
    next.extend(incoming);
    newest_first(&mut next, self.limit);
    self.persist(&next).await?;

    let added = next.iter().filter(|e| incoming_ids.contains(&e.id)).count();
    *entries = next;

    let report = ImportReport { added, skipped, total: entries.len() };
    info!(target: "practice", added, skipped, total = report.total, "History imported");
    Ok(report)
  }

  async fn persist(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
    let Some(path) = &self.path else { return Ok(()) };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(target: "practice", path = %path.display(), count = entries.len(), "History persisted");
    Ok(())
  }
}

async fn load_file(path: &Path) -> Vec<HistoryEntry> {
  let bytes = match tokio::fs::read(path).await {
    Ok(b) => b,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
    Err(e) => {
      error!(target: "practice", path = %path.display(), error = %e, "Failed to read history; starting empty");
      return Vec::new();
    }
  };
  match serde_json::from_slice::<Vec<HistoryEntry>>(&bytes) {
    Ok(v) => v,
    Err(e) => {
      warn!(target: "practice", path = %path.display(), error = %e, "History file is corrupt; starting empty");
      Vec::new()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn entry(id: &str, minutes_ago: i64, mode: ExerciseMode, score: f32) -> HistoryEntry {
    HistoryEntry {
      id: id.into(),
      created_at: Utc::now() - Duration::minutes(minutes_ago),
      exercise_id: format!("ex-{id}"),
      mode,
      level: "n5".into(),
      prompt_zh: "我想喝咖啡。".into(),
      reference_ja: "コーヒーが飲みたいです。".into(),
      user_answer: format!("answer {id}"),
      correct: score >= 60.0,
      score,
      evaluation: String::new(),
      corrected: String::new(),
      feedback_markdown: String::new(),
    }
  }

  #[tokio::test]
  async fn append_keeps_newest_first_and_truncates() {
    let store = HistoryStore::in_memory(2);
    store.append(entry("a", 3, ExerciseMode::Translation, 10.0)).await.unwrap();
    store.append(entry("b", 2, ExerciseMode::Translation, 20.0)).await.unwrap();
    store.append(entry("c", 1, ExerciseMode::Translation, 30.0)).await.unwrap();

    let page = store.list(&HistoryFilter::default()).await;
    let ids: Vec<_> = page.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["c", "b"]);
  }

  #[tokio::test]
  async fn persists_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("history.json");

    let store = HistoryStore::open(Some(path.clone()), 10).await;
    store.append(entry("a", 1, ExerciseMode::Choice, 100.0)).await.unwrap();
    drop(store);

    let reopened = HistoryStore::open(Some(path.clone()), 10).await;
    assert_eq!(reopened.get("a").await.unwrap().score, 100.0);
    assert!(!path.with_extension("json.tmp").exists());
  }

  #[tokio::test]
  async fn corrupt_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let store = HistoryStore::open(Some(path), 10).await;
    assert_eq!(store.list(&HistoryFilter::default()).await.total, 0);
  }

  #[tokio::test]
  async fn filters_combine() {
    let store = HistoryStore::in_memory(10);
    store.append(entry("a", 3, ExerciseMode::Translation, 40.0)).await.unwrap();
    store.append(entry("b", 2, ExerciseMode::Choice, 100.0)).await.unwrap();
    store.append(entry("c", 1, ExerciseMode::Translation, 90.0)).await.unwrap();

    let f = HistoryFilter { mode: Some(ExerciseMode::Translation), min_score: Some(50.0), ..Default::default() };
    let page = store.list(&f).await;
    assert_eq!(page.total, 1);
    assert_eq!(page.entries[0].id, "c");

    let f = HistoryFilter { q: Some("ANSWER B".into()), ..Default::default() };
    assert_eq!(store.list(&f).await.entries[0].id, "b");

    let f = HistoryFilter { offset: 1, limit: Some(1), ..Default::default() };
    let page = store.list(&f).await;
    assert_eq!(page.total, 3);
    assert_eq!(page.entries[0].id, "b");
  }

  #[tokio::test]
  async fn stats_split_by_mode() {
    let store = HistoryStore::in_memory(10);
    store.append(entry("a", 2, ExerciseMode::Translation, 40.0)).await.unwrap();
    store.append(entry("b", 1, ExerciseMode::Translation, 80.0)).await.unwrap();
    store.append(entry("c", 0, ExerciseMode::Choice, 100.0)).await.unwrap();

    let s = store.stats().await;
    assert_eq!(s.total, 3);
    assert_eq!(s.correct, 2);
    assert!((s.average_score - 220.0 / 3.0).abs() < 1e-3);
    assert_eq!(s.by_mode["translation"].count, 2);
    assert_eq!(s.by_mode["translation"].average_score, 60.0);
  }

  #[tokio::test]
  async fn merge_import_dedupes_and_replace_overwrites() {
    let store = HistoryStore::in_memory(3);
    store.append(entry("a", 5, ExerciseMode::Translation, 50.0)).await.unwrap();

    let doc = HistoryExport {
      version: EXPORT_VERSION,
      exported_at: Utc::now(),
      entries: vec![
        entry("a", 5, ExerciseMode::Translation, 50.0),
        entry("b", 1, ExerciseMode::Choice, 0.0),
        entry("c", 9, ExerciseMode::Choice, 100.0),
        entry("d", 0, ExerciseMode::Choice, 100.0),
      ],
    };
    let report = store.import(doc.clone(), ImportMode::Merge).await.unwrap();
    assert_eq!(report, ImportReport { added: 2, skipped: 1, total: 3 });
    let ids: Vec<_> = store.export().await.entries.into_iter().map(|e| e.id).collect();
    assert_eq!(ids, ["d", "b", "a"]);

    let only_c = HistoryExport { entries: vec![entry("c", 9, ExerciseMode::Choice, 100.0)], ..doc };
    let report = store.import(only_c, ImportMode::Replace).await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(store.get("c").await.unwrap().score, 100.0);
  }

  #[tokio::test]
  async fn rejects_unknown_export_version() {
    let store = HistoryStore::in_memory(3);
    let doc = HistoryExport { version: 99, exported_at: Utc::now(), entries: vec![] };
    assert!(matches!(
      store.import(doc, ImportMode::Merge).await,
      Err(HistoryError::UnsupportedVersion(99))
    ));
  }

  #[tokio::test]
  async fn delete_and_clear() {
    let store = HistoryStore::in_memory(5);
    store.append(entry("a", 1, ExerciseMode::Translation, 10.0)).await.unwrap();
    store.append(entry("b", 0, ExerciseMode::Translation, 10.0)).await.unwrap();

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());
    assert_eq!(store.clear().await.unwrap(), 1);
    assert_eq!(store.stats().await, HistoryStats::default());
  }

  #[tokio::test]
  async fn failed_write_leaves_memory_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    let store = HistoryStore::open(Some(path.clone()), 5).await;
    store.append(entry("a", 1, ExerciseMode::Translation, 10.0)).await.unwrap();

    // Swap the file for a directory so the rename over it fails.
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    assert!(store.append(entry("b", 0, ExerciseMode::Translation, 90.0)).await.is_err());
    assert!(store.delete("a").await.is_err());
    assert!(store.clear().await.is_err());
    let doc = HistoryExport {
      version: EXPORT_VERSION,
      exported_at: Utc::now(),
      entries: vec![entry("c", 2, ExerciseMode::Choice, 100.0)],
    };
    assert!(store.import(doc, ImportMode::Replace).await.is_err());

    let page = store.list(&HistoryFilter::default()).await;
    assert_eq!(page.total, 1);
    assert_eq!(page.entries[0].id, "a");
  }
}
