//! Markdown → HTML for the explanation part of graded feedback.
//!
//! Raw HTML in the source (from the model or echoed learner answers) is
//! rendered as escaped text, never as markup.

use pulldown_cmark::{html, Event, Options, Parser};

pub fn render_markdown(md: &str) -> String {
  let mut opts = Options::empty();
  opts.insert(Options::ENABLE_TABLES);
  opts.insert(Options::ENABLE_STRIKETHROUGH);

  let parser = Parser::new_ext(md, opts).map(|ev| match ev {
    Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
    ev => ev,
  });
  let mut out = String::with_capacity(md.len() * 3 / 2);
  html::push_html(&mut out, parser);
  out
}
