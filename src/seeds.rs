//! Built-in sentence bank so the trainer is usable without a config file or AI.

use uuid::Uuid;

use crate::domain::{Sentence, SentenceSource};

fn seed(id: &str, level: &str, zh: &str, ja: &str, distractors: [&str; 3]) -> Sentence {
  Sentence {
    id: id.into(),
    level: level.into(),
    zh: zh.into(),
    ja: ja.into(),
    distractors: distractors.iter().map(|s| s.to_string()).collect(),
    source: SentenceSource::Seed,
  }
}

/// Minimal set of built-in sentences, a few per level.
pub fn seed_sentences() -> Vec<Sentence> {
  vec![
    seed("s-n5-1", "n5", "今天天气很好。", "今日はいい天気です。",
      ["昨日はいい天気でした。", "今日は天気が悪いです。", "明日はいい天気です。"]),
    seed("s-n5-2", "n5", "我想喝咖啡。", "コーヒーが飲みたいです。",
      ["お茶が飲みたいです。", "コーヒーを飲みました。", "コーヒーが好きではありません。"]),
    seed("s-n5-3", "n5", "这是我的书。", "これは私の本です。",
      ["それはあなたの本です。", "これは私のペンです。", "あれは私の本ですか。"]),
    seed("s-n4-1", "n4", "他昨天去了北京。", "彼は昨日北京に行きました。",
      ["彼は明日北京に行きます。", "彼女は昨日北京に行きました。", "彼は昨日北京から来ました。"]),
    seed("s-n4-2", "n4", "如果明天下雨，我就不去了。", "もし明日雨が降ったら、行きません。",
      ["明日雨が降っても、行きます。", "もし明日晴れたら、行きません。", "昨日雨が降ったので、行きませんでした。"]),
    seed("s-n3-1", "n3", "虽然很累，但是我很开心。", "疲れているけれど、とても楽しいです。",
      ["疲れているので、楽しくないです。", "疲れていないけれど、楽しいです。", "とても疲れましたが、楽しくなかったです。"]),
    seed("s-n3-2", "n3", "我一边听音乐一边学习。", "音楽を聞きながら勉強します。",
      ["勉強してから音楽を聞きます。", "音楽を聞いたあとで勉強します。", "音楽を聞かずに勉強します。"]),
  ]
}

/// Absolute last-resort fallback: if the pool for a level is empty, we serve this.
pub fn hard_fallback_sentence(level: String) -> Sentence {
  Sentence {
    id: Uuid::new_v4().to_string(),
    level,
    zh: "他是老师。".into(),
    ja: "彼は先生です。".into(),
    distractors: vec![
      "彼は学生です。".into(),
      "彼女は先生です。".into(),
      "彼は先生ではありません。".into(),
    ],
    source: SentenceSource::Seed,
  }
}
