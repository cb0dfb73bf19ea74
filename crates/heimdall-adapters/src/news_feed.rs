//! News-feed adapter — article metadata from a keyword-search news API.
//!
//! The one family where a rate-limited upstream still yields a *valid*
//! envelope: the `{error: "rate_limited", articles: []}` marker is persisted
//! to Bronze so the cleaning watermark can move past it.

use chrono::Utc;
use heimdall_core::envelope::{EnvelopeItems, RawArticle, RawEnvelope};
use heimdall_fetch::{FetchClient, FetchError, FetchRequest, Shutdown};
use serde::Deserialize;
use url::Url;

use crate::settings::NewsSourceSettings;
use crate::{AdapterError, FetchContext, Result};

const RATE_LIMITED_MARKER: &str = "rate_limited";

// ─── Config ──────────────────────────────────────────────────────────────────

/// Per-catalog configuration: search keywords plus an optional domain filter.
#[derive(Debug, Deserialize)]
struct NewsConfig {
  keywords: KeywordSpec,
  #[serde(default)]
  domains:  Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordSpec {
  Joined(String),
  List(Vec<String>),
}

impl KeywordSpec {
  fn terms(&self) -> Vec<String> {
    let raw: Vec<&str> = match self {
      Self::Joined(s) => s.split(',').collect(),
      Self::List(list) => list.iter().map(String::as_str).collect(),
    };
    raw
      .into_iter()
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .map(str::to_owned)
      .collect()
  }
}

/// OR-join the terms, quoting multi-word phrases.
fn build_query(terms: &[String]) -> String {
  terms
    .iter()
    .map(|t| {
      if t.contains(' ') && !t.to_uppercase().contains(" OR ") {
        format!("\"{t}\"")
      } else {
        t.clone()
      }
    })
    .collect::<Vec<_>>()
    .join(" OR ")
}

// ─── Vendor response ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
  #[serde(default)]
  articles: Vec<VendorArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendorArticle {
  #[serde(default)]
  title:        Option<String>,
  #[serde(default)]
  url:          Option<String>,
  #[serde(default)]
  published_at: Option<String>,
  #[serde(default)]
  author:       Option<String>,
  #[serde(default)]
  source:       Option<VendorSource>,
  #[serde(default)]
  description:  Option<String>,
}

#[derive(Debug, Deserialize)]
struct VendorSource {
  #[serde(default)]
  name: Option<String>,
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

pub struct NewsFeedAdapter {
  client:   FetchClient,
  settings: NewsSourceSettings,
}

impl NewsFeedAdapter {
  pub fn new(client: FetchClient, settings: NewsSourceSettings) -> Self {
    Self { client, settings }
  }

  /// Fetch article metadata for the configured keywords. Bodies are not
  /// fetched here — full-text extraction is a cleaner concern.
  pub async fn fetch(
    &self,
    ctx: &FetchContext,
    shutdown: &Shutdown,
  ) -> Result<RawEnvelope> {
    let config: NewsConfig = serde_json::from_value(ctx.config.clone())
      .map_err(|e| AdapterError::InvalidConfig(format!("{}: {e}", ctx.catalog_key)))?;

    let terms = config.keywords.terms();
    if terms.is_empty() {
      return Err(AdapterError::InvalidConfig(format!(
        "{}: no search keywords",
        ctx.catalog_key
      )));
    }

    let query = build_query(&terms);
    let page_size = if ctx.probe { 1 } else { self.settings.page_size };
    let domains = config
      .domains
      .as_ref()
      .filter(|d| !d.is_empty())
      .map(|d| d.join(","));

    let url = Url::parse(&format!(
      "{}/everything",
      self.settings.base_url.trim_end_matches('/')
    ))
    .map_err(|e| AdapterError::InvalidConfig(format!("bad base_url: {e}")))?;

    let mut request = FetchRequest::new(url)
      .query("q", query.clone())
      .query("apiKey", self.settings.api_key.clone())
      .query("pageSize", page_size.to_string())
      .query("sortBy", "publishedAt")
      .query("language", "en")
      .timeout(self.settings.timeout());
    if let Some(domains) = &domains {
      request = request.query("domains", domains.clone());
    }

    let query_echo = serde_json::json!({
      "q":         query,
      "domains":   domains,
      "page_size": page_size,
    });

    let body = match self.client.get_json(&request, shutdown).await {
      Ok(body) => body,
      // Retries exhausted on 429: record the quota exhaustion as data so
      // the cleaning watermark can move past this fetch window.
      Err(e @ FetchError::Transient { .. }) if e.is_rate_limited() => {
        tracing::warn!(
          catalog_key = %ctx.catalog_key,
          error_kind = e.kind(),
          "news upstream rate limited; recording error envelope"
        );
        return Ok(RawEnvelope {
          fetched_at: Utc::now(),
          query_echo,
          items: EnvelopeItems::NewsFeed {
            error:    Some(RATE_LIMITED_MARKER.to_owned()),
            articles: vec![],
          },
        });
      }
      Err(e) => return Err(e.into()),
    };

    let response: SearchResponse = serde_json::from_value(body)
      .map_err(|e| AdapterError::Decode(format!("{}: {e}", ctx.catalog_key)))?;

    let articles = response
      .articles
      .into_iter()
      .filter_map(|a| {
        let title = a.title?.trim().to_owned();
        let url = a.url?.trim().to_owned();
        if title.is_empty() || url.is_empty() {
          return None;
        }
        Some(RawArticle {
          title,
          url,
          published_at: a.published_at,
          author: a.author,
          source_name: a.source.and_then(|s| s.name),
          description: a.description,
        })
      })
      .collect();

    Ok(RawEnvelope {
      fetched_at: Utc::now(),
      query_echo,
      items: EnvelopeItems::NewsFeed { error: None, articles },
    })
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keywords_accept_both_shapes() {
    let joined: NewsConfig =
      serde_json::from_value(serde_json::json!({ "keywords": "AI, Big Tech, Chips" }))
        .unwrap();
    assert_eq!(joined.keywords.terms(), ["AI", "Big Tech", "Chips"]);

    let list: NewsConfig = serde_json::from_value(
      serde_json::json!({ "keywords": ["Fed", "Powell"], "domains": ["example.com"] }),
    )
    .unwrap();
    assert_eq!(list.keywords.terms(), ["Fed", "Powell"]);
  }

  #[test]
  fn query_quotes_phrases() {
    let terms = vec!["Fed".to_owned(), "rate cut".to_owned()];
    assert_eq!(build_query(&terms), "Fed OR \"rate cut\"");
  }
}
