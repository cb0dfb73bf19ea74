//! Readability-style full-text extraction for news articles.
//!
//! Fetches the article HTML through the shared fetch client (which brings
//! per-host limits and retries with it), then strips the page down to its
//! paragraph text. Extraction failures are never errors — the cleaner falls
//! back to the article description.

use std::time::Duration;

use async_trait::async_trait;
use heimdall_fetch::{FetchClient, FetchRequest, Shutdown};
use scraper::{Html, Selector};
use url::Url;

/// Whole-extraction deadline, retries included.
const EXTRACT_DEADLINE: Duration = Duration::from_secs(10);
/// Initial attempt plus one retry on transient failure — a tighter budget
/// than the adapters' schedule, so a flaky host cannot eat the deadline
/// before the description fallback gets its turn.
const EXTRACT_ATTEMPTS: u32 = 2;
/// Extracted bodies are capped to keep Silver rows bounded.
const MAX_BODY_CHARS: usize = 5_000;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Body extraction behind a trait so the cleaning pipeline can be exercised
/// without a network.
#[async_trait]
pub trait BodyExtractor: Send + Sync {
  /// Full article text for `url`, or `None` when the fetch fails or the
  /// page yields nothing usable.
  async fn body(&self, url: &str, shutdown: &Shutdown) -> Option<String>;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpExtractor {
  client: FetchClient,
}

impl HttpExtractor {
  pub fn new(client: FetchClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl BodyExtractor for HttpExtractor {
  async fn body(&self, url: &str, shutdown: &Shutdown) -> Option<String> {
    let parsed = match Url::parse(url.trim()) {
      Ok(u) => u,
      Err(e) => {
        tracing::debug!(url, error = %e, "skipping extraction for unparseable url");
        return None;
      }
    };

    let request = FetchRequest::new(parsed).timeout(EXTRACT_DEADLINE);
    let fetched = tokio::time::timeout(
      EXTRACT_DEADLINE,
      self.client.get_text(&request, shutdown, EXTRACT_ATTEMPTS),
    )
    .await;

    let html = match fetched {
      Ok(Ok(html)) => html,
      Ok(Err(e)) => {
        tracing::debug!(url, error = %e, "article fetch failed");
        return None;
      }
      Err(_) => {
        tracing::debug!(url, "article fetch exceeded extraction deadline");
        return None;
      }
    };

    let body = extract_text(&html);
    if body.is_none() {
      tracing::debug!(url, "extractor found no usable text");
    }
    body
  }
}

// ─── Text extraction ─────────────────────────────────────────────────────────

/// Pull readable paragraph text out of an HTML document: prefer `<article>`
/// paragraphs, fall back to all paragraphs, normalize whitespace, cap the
/// length. Returns `None` when nothing substantial survives.
pub fn extract_text(html: &str) -> Option<String> {
  let document = Html::parse_document(html);

  let article_paragraphs = Selector::parse("article p").ok()?;
  let all_paragraphs = Selector::parse("p").ok()?;

  let mut chunks: Vec<String> = document
    .select(&article_paragraphs)
    .map(element_text)
    .filter(|t| !t.is_empty())
    .collect();

  if chunks.is_empty() {
    chunks = document
      .select(&all_paragraphs)
      .map(element_text)
      .filter(|t| !t.is_empty())
      .collect();
  }

  let joined = chunks.join(" ");
  let normalized = joined.split_whitespace().collect::<Vec<_>>().join(" ");
  if normalized.is_empty() {
    return None;
  }

  Some(truncate_chars(normalized, MAX_BODY_CHARS))
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
  element.text().collect::<Vec<_>>().join(" ").trim().to_owned()
}

fn truncate_chars(s: String, max: usize) -> String {
  match s.char_indices().nth(max) {
    Some((idx, _)) => s[..idx].to_owned(),
    None => s,
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefers_article_paragraphs() {
    let html = r#"
      <html><body>
        <nav><p>Site navigation</p></nav>
        <article>
          <p>First sentence of   the story.</p>
          <p>Second sentence.</p>
        </article>
      </body></html>"#;

    let text = extract_text(html).unwrap();
    assert_eq!(text, "First sentence of the story. Second sentence.");
  }

  #[test]
  fn falls_back_to_bare_paragraphs() {
    let html = "<html><body><p>No article wrapper here.</p></body></html>";
    assert_eq!(extract_text(html).unwrap(), "No article wrapper here.");
  }

  #[test]
  fn empty_page_yields_none() {
    assert!(extract_text("<html><body><div>no paragraphs</div></body></html>").is_none());
    assert!(extract_text("").is_none());
  }

  #[test]
  fn long_bodies_are_capped() {
    let paragraph = "word ".repeat(3_000);
    let html = format!("<html><body><p>{paragraph}</p></body></html>");
    let text = extract_text(&html).unwrap();
    assert_eq!(text.chars().count(), MAX_BODY_CHARS);
  }
}
