//! Incremental parser for graded feedback streams.
//!
//! The grader answers in two parts separated by a one-time delimiter:
//!
//! ```text
//! Score: 85
//! Evaluation: 意味は伝わりますが、助詞が不自然です。
//! Corrected: 今日はいい天気ですね。
//!
//! ---␠
//! ## Explanation ...
//! ```
//!
//! Header fields are emitted as soon as their line is complete, so the client can
//! show the score while the explanation is still streaming. Everything after the
//! delimiter is markdown and is forwarded verbatim. When the model forgets the
//! delimiter we fall back to scanning the whole text at the end of the stream.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Separator between the header fields and the markdown body.
pub const DELIMITER: &str = "\n--- \n";

/// Past this many header bytes without a delimiter, stop waiting for one.
const HEADER_LIMIT: usize = 4096;

#[derive(Clone, Debug, PartialEq)]
pub enum FeedbackEvent {
  Score(f32),
  Evaluation(String),
  Corrected(String),
  /// Raw markdown text, in stream order.
  Body(String),
}

/// Final, fully parsed feedback.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Feedback {
  pub score: Option<f32>,
  pub evaluation: Option<String>,
  pub corrected: Option<String>,
  pub body_markdown: String,
  /// False when the stream never contained the delimiter.
  pub delimited: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
  Header,
  Body { delimited: bool },
}

struct FieldPatterns {
  score: Regex,
  evaluation: Regex,
  corrected: Regex,
  number: Regex,
}

fn patterns() -> &'static FieldPatterns {
  static PATTERNS: OnceLock<FieldPatterns> = OnceLock::new();
  PATTERNS.get_or_init(|| {
    let field = |labels: &str| {
      Regex::new(&format!(r"(?i)^[\s>*#_-]*(?:{labels})[\s*_]*[:：]\s*(.*)$"))
        .expect("static field regex")
    };
    FieldPatterns {
      score: field("score|スコア|点数|得点|得分|分数"),
      evaluation: field("evaluation|comment|評価|コメント|评价"),
      corrected: field("corrected|correction|修正|添削|正解例|修改"),
      number: Regex::new(r"\d+(?:\.\d+)?").expect("static number regex"),
    }
  })
}

fn clean_value(raw: &str) -> &str {
  raw.trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '_')
}

fn parse_score(value: &str) -> Option<f32> {
  let m = patterns().number.find(value)?;
  let n = m.as_str().parse::<f32>().ok()?;
  Some(n.clamp(0.0, 100.0))
}

fn is_field_line(line: &str) -> bool {
  let p = patterns();
  p.score.is_match(line) || p.evaluation.is_match(line) || p.corrected.is_match(line)
}

/// Drop recognised header lines, keep everything else with its line endings.
fn strip_field_lines(text: &str) -> String {
  text
    .split_inclusive('\n')
    .filter(|l| !is_field_line(l.trim_end_matches(['\n', '\r'])))
    .collect()
}

/// Streaming state machine: feed chunks with [`FeedbackParser::push`], close with
/// [`FeedbackParser::finish`].
#[derive(Debug)]
pub struct FeedbackParser {
  phase: Phase,
  header: String,
  /// Byte offset in `header` up to which complete lines were scanned.
  scanned: usize,
  body: String,
  score: Option<f32>,
  evaluation: Option<String>,
  corrected: Option<String>,
}

impl Default for FeedbackParser {
  fn default() -> Self {
    Self::new()
  }
}

impl FeedbackParser {
  pub fn new() -> Self {
    Self {
      phase: Phase::Header,
      header: String::new(),
      scanned: 0,
      body: String::new(),
      score: None,
      evaluation: None,
      corrected: None,
    }
  }

  /// Feed the next slice of the stream. Chunk boundaries are arbitrary.
  pub fn push(&mut self, chunk: &str) -> Vec<FeedbackEvent> {
    let mut events = Vec::new();
    if chunk.is_empty() {
      return events;
    }

    if let Phase::Body { .. } = self.phase {
      self.body.push_str(chunk);
      events.push(FeedbackEvent::Body(chunk.to_string()));
      return events;
    }

    self.header.push_str(chunk);

    if let Some((start, end)) = find_delimiter(&self.header) {
      let header = self.header[..start].to_string();
      let rest = self.header[end..].to_string();
      self.scan_lines(&header, true, &mut events);
      self.phase = Phase::Body { delimited: true };
      self.header.clear();
      if !rest.is_empty() {
        self.body.push_str(&rest);
        events.push(FeedbackEvent::Body(rest));
      }
      return events;
    }

    if self.header.len() > HEADER_LIMIT {
      let header = std::mem::take(&mut self.header);
      self.scan_lines(&header, true, &mut events);
      let rest = strip_field_lines(&header);
      self.phase = Phase::Body { delimited: false };
      if !rest.is_empty() {
        self.body.push_str(&rest);
        events.push(FeedbackEvent::Body(rest));
      }
      return events;
    }

    let header = self.header.clone();
    self.scan_lines(&header, false, &mut events);
    events
  }

  /// Close the stream and produce the final feedback. Never fails: missing
  /// fields simply stay `None`.
  pub fn finish(mut self) -> (Vec<FeedbackEvent>, Feedback) {
    let mut events = Vec::new();
    let delimited = match self.phase {
      Phase::Body { delimited } => delimited,
      Phase::Header => {
        let header = std::mem::take(&mut self.header);
        self.scan_lines(&header, true, &mut events);
        let rest = strip_field_lines(&header);
        let rest = rest.trim();
        if !rest.is_empty() {
          self.body.push_str(rest);
          events.push(FeedbackEvent::Body(rest.to_string()));
        }
        false
      }
    };

    let feedback = Feedback {
      score: self.score,
      evaluation: self.evaluation,
      corrected: self.corrected,
      body_markdown: self.body.trim().to_string(),
      delimited,
    };
    (events, feedback)
  }

  /// Scan unscanned lines of `text`. The trailing partial line is only
  /// considered when `include_tail` is set.
  fn scan_lines(&mut self, text: &str, include_tail: bool, events: &mut Vec<FeedbackEvent>) {
    let from = self.scanned.min(text.len());
    let upto = if include_tail {
      text.len()
    } else {
      match text[from..].rfind('\n') {
        Some(i) => from + i + 1,
        None => return,
      }
    };

    for line in text[from..upto].lines() {
      if let Some(ev) = self.take_line(line.trim_end_matches('\r')) {
        events.push(ev);
      }
    }
    self.scanned = if include_tail { 0 } else { upto };
  }

  fn take_line(&mut self, line: &str) -> Option<FeedbackEvent> {
    let p = patterns();
    if let Some(c) = p.score.captures(line) {
      if self.score.is_some() {
        return None;
      }
      let score = parse_score(c.get(1).map_or("", |m| m.as_str()))?;
      self.score = Some(score);
      return Some(FeedbackEvent::Score(score));
    }
    if let Some(c) = p.evaluation.captures(line) {
      let value = clean_value(c.get(1).map_or("", |m| m.as_str()));
      if self.evaluation.is_some() || value.is_empty() {
        return None;
      }
      self.evaluation = Some(value.to_string());
      return Some(FeedbackEvent::Evaluation(value.to_string()));
    }
    if let Some(c) = p.corrected.captures(line) {
      let value = clean_value(c.get(1).map_or("", |m| m.as_str()));
      if self.corrected.is_some() || value.is_empty() {
        return None;
      }
      self.corrected = Some(value.to_string());
      return Some(FeedbackEvent::Corrected(value.to_string()));
    }
    None
  }
}

/// A delimiter at the very start of the stream has no leading newline.
fn find_delimiter(header: &str) -> Option<(usize, usize)> {
  let bare = &DELIMITER[1..];
  if header.starts_with(bare) {
    return Some((0, bare.len()));
  }
  header.find(DELIMITER).map(|i| (i, i + DELIMITER.len()))
}

/// Parse a complete, already-collected response.
pub fn parse_feedback(text: &str) -> Feedback {
  let mut parser = FeedbackParser::new();
  parser.push(text);
  parser.finish().1
}

/// Render feedback back into the wire format. Used by the local grader so its
/// output travels the same path as a model stream.
pub fn compose_feedback(score: f32, evaluation: &str, corrected: &str, body_markdown: &str) -> String {
  format!(
    "Score: {:.0}\nEvaluation: {}\nCorrected: {}{}{}",
    score, evaluation, corrected, DELIMITER, body_markdown
  )
}
