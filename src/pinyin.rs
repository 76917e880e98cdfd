//! Pinyin reading aids for the Chinese prompt sentence.
//!
//! Two shapes are offered: a flat string (`"wǒ xiǎng hē kā fēi。"`) and ruby
//! segments, one per Han character, for rendering pinyin above the text.
//! Conversion is per character with the `pinyin` crate's default reading, so
//! polyphonic characters may occasionally be off.

use pinyin::ToPinyin;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RubySegment {
  pub text: String,
  /// `None` for runs of non-Han text.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pinyin: Option<String>,
}

/// Han characters become space-separated syllables with tone marks; anything
/// else is copied as-is.
pub fn to_pinyin_diacritics(text: &str) -> String {
  let mut out = String::with_capacity(text.len() * 2);
  let mut last_was_hanzi = false;

  for ch in text.chars() {
    match ch.to_pinyin() {
      Some(py) => {
        if last_was_hanzi {
          out.push(' ');
        }
        out.push_str(py.with_tone());
        last_was_hanzi = true;
      }
      None => {
        out.push(ch);
        last_was_hanzi = false;
      }
    }
  }
  out
}

/// One segment per Han character; consecutive non-Han characters are merged.
pub fn ruby_segments(text: &str) -> Vec<RubySegment> {
  let mut out: Vec<RubySegment> = Vec::new();
  for ch in text.chars() {
    match ch.to_pinyin() {
      Some(py) => out.push(RubySegment { text: ch.to_string(), pinyin: Some(py.with_tone().to_string()) }),
      None => match out.last_mut() {
        Some(last) if last.pinyin.is_none() => last.text.push(ch),
        _ => out.push(RubySegment { text: ch.to_string(), pinyin: None }),
      },
    }
  }
  out
}
