//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// True if unicode char belongs to CJK ideograph ranges.
pub fn is_cjk(ch: char) -> bool {
  ('\u{4E00}'..='\u{9FFF}').contains(&ch)
    || ('\u{3400}'..='\u{4DBF}').contains(&ch)
    || ('\u{20000}'..='\u{2A6DF}').contains(&ch)
    || ('\u{2A700}'..='\u{2B73F}').contains(&ch)
    || ('\u{2B740}'..='\u{2B81F}').contains(&ch)
    || ('\u{2B820}'..='\u{2CEAF}').contains(&ch)
    || ('\u{F900}'..='\u{FAFF}').contains(&ch)
}

/// Hiragana or katakana (including the prolonged sound mark).
pub fn is_kana(ch: char) -> bool {
  ('\u{3040}'..='\u{309F}').contains(&ch) || ('\u{30A0}'..='\u{30FF}').contains(&ch)
}

/// Normalize an answer for comparison: drop whitespace and sentence
/// punctuation (ASCII and full-width), map full-width ASCII to half-width.
pub fn normalize_answer(s: &str) -> String {
  s.chars()
    .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
    .filter(|c| !matches!(c, '。' | '、' | '，' | '！' | '？' | '「' | '」' | '『' | '』' | '・' | '…' | '～'))
    .map(|c| match c {
      '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
      _ => c,
    })
    .filter(|c| !c.is_ascii_punctuation())
    .collect()
}

/// Log-safe truncation for large strings (char-boundary aware).
pub fn trunc_for_log(s: &str, max_chars: usize) -> String {
  let mut it = s.char_indices();
  match it.nth(max_chars) {
    None => s.to_string(),
    Some((cut, _)) => format!("{}… ({} bytes total)", &s[..cut], s.len()),
  }
}
