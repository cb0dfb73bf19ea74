//! Silver-tier row types and the news URL fingerprint.
//!
//! Silver rows are the typed, deduplicated output of the cleaners. Identity
//! is content-derived: (catalog key, date) for time series, md5 of the
//! canonicalized URL for news.

use chrono::{DateTime, NaiveDate, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use url::Url;

// ─── Time-series rows ────────────────────────────────────────────────────────

/// One `timeseries_macro` observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroRow {
  pub catalog_key: String,
  pub date:        NaiveDate,
  pub value:       f64,
}

/// One `timeseries_micro` price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroRow {
  pub catalog_key: String,
  pub date:        NaiveDate,
  pub open:        f64,
  pub high:        f64,
  pub low:         f64,
  pub close:       f64,
  pub volume:      Option<i64>,
}

impl MicroRow {
  /// `low ≤ min(open, close) ≤ max(open, close) ≤ high`, volume non-negative
  /// where present.
  pub fn is_sane(&self) -> bool {
    let finite = [self.open, self.high, self.low, self.close]
      .iter()
      .all(|v| v.is_finite());
    finite
      && self.low <= self.open.min(self.close)
      && self.open.max(self.close) <= self.high
      && self.volume.map_or(true, |v| v >= 0)
  }
}

// ─── News rows ───────────────────────────────────────────────────────────────

/// One `news_intel_pool` row. The sentiment and summary slots belong to
/// downstream consumers and are never written by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRow {
  pub fingerprint:  String,
  pub catalog_key:  String,
  pub title:        String,
  pub url:          String,
  pub published_at: Option<DateTime<Utc>>,
  pub author:       Option<String>,
  pub source_name:  Option<String>,
  pub body:         Option<String>,
}

// ─── URL canonicalization and fingerprint ────────────────────────────────────

/// Query parameters that never affect article identity.
fn is_tracking_param(key: &str) -> bool {
  key.starts_with("utm_") || key == "fbclid" || key == "gclid" || key == "ref"
}

/// Canonical form of an article URL: scheme and host lowercased (the parser
/// does this), fragment dropped, tracking parameters stripped, single
/// trailing slash removed from non-root paths.
pub fn canonicalize_url(raw: &str) -> Result<String, url::ParseError> {
  let mut url = Url::parse(raw.trim())?;
  url.set_fragment(None);

  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| !is_tracking_param(k))
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  if kept.is_empty() {
    url.set_query(None);
  } else {
    url
      .query_pairs_mut()
      .clear()
      .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
  }

  let path = url.path().to_owned();
  if path.len() > 1 && path.ends_with('/') {
    url.set_path(path.trim_end_matches('/'));
  }

  Ok(url.into())
}

/// md5 hex of the canonicalized URL — the single authoritative identity of a
/// news row. Unparseable URLs fall back to hashing the trimmed raw string so
/// a malformed link still dedups against itself.
pub fn url_fingerprint(raw: &str) -> String {
  let canonical =
    canonicalize_url(raw).unwrap_or_else(|_| raw.trim().to_owned());
  format!("{:x}", Md5::digest(canonical.as_bytes()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fingerprint_ignores_tracking_and_fragment() {
    let a = url_fingerprint("https://example.com/markets/fed-holds");
    let b = url_fingerprint(
      "https://EXAMPLE.com/markets/fed-holds/?utm_source=rss&utm_medium=feed#top",
    );
    assert_eq!(a, b);
  }

  #[test]
  fn fingerprint_keeps_meaningful_query() {
    let a = url_fingerprint("https://example.com/article?id=1");
    let b = url_fingerprint("https://example.com/article?id=2");
    assert_ne!(a, b);
  }

  #[test]
  fn fingerprint_of_malformed_url_is_stable() {
    let a = url_fingerprint("not a url");
    let b = url_fingerprint("  not a url  ");
    assert_eq!(a, b);
  }

  #[test]
  fn canonical_root_path_keeps_slash() {
    let c = canonicalize_url("https://example.com/").unwrap();
    assert_eq!(c, "https://example.com/");
  }

  #[test]
  fn ohlc_sanity() {
    let row = MicroRow {
      catalog_key: "NVDA".into(),
      date:        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
      open:        100.0,
      high:        110.0,
      low:         95.0,
      close:       108.0,
      volume:      Some(1_000),
    };
    assert!(row.is_sane());

    let inverted = MicroRow { high: 90.0, ..row.clone() };
    assert!(!inverted.is_sane());

    let negative_volume = MicroRow { volume: Some(-1), ..row.clone() };
    assert!(!negative_volume.is_sane());

    let nan = MicroRow { close: f64::NAN, ..row };
    assert!(!nan.is_sane());
  }
}
