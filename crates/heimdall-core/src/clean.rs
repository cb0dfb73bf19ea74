//! Pure cleaners: raw envelope in, typed Silver rows out.
//!
//! Each cleaner is a total function over its family's envelopes — malformed
//! items are dropped and counted, never propagated as errors. The network
//! half of news cleaning (body extraction) lives in the pipeline crate; this
//! module only prepares the metadata drafts.

use chrono::{DateTime, NaiveDate, Utc};

use crate::catalog::SourceFamily;
use crate::envelope::{EnvelopeItems, RawEnvelope};
use crate::silver::{url_fingerprint, MacroRow, MicroRow};
use crate::{Error, Result};

/// Rows produced from one envelope plus the number of items dropped.
#[derive(Debug, Clone)]
pub struct CleanOutput<T> {
  pub rows:    Vec<T>,
  pub skipped: usize,
}

impl<T> CleanOutput<T> {
  fn empty_skipped() -> Self {
    Self { rows: Vec::new(), skipped: 1 }
  }
}

// ─── Macro series ────────────────────────────────────────────────────────────

/// Emit one row per observation with a parseable finite value and a valid
/// date; sentinel and non-numeric values are dropped.
pub fn clean_macro(
  catalog_key: &str,
  envelope: &RawEnvelope,
) -> Result<CleanOutput<MacroRow>> {
  let EnvelopeItems::MacroSeries { observations } = &envelope.items else {
    return Err(Error::FamilyMismatch {
      expected: SourceFamily::MacroSeries,
      got:      envelope.family(),
    });
  };

  let mut rows = Vec::with_capacity(observations.len());
  let mut skipped = 0;

  for obs in observations {
    let value = match obs.value.trim().parse::<f64>() {
      Ok(v) if v.is_finite() => v,
      _ => {
        tracing::warn!(
          catalog_key,
          date = %obs.date,
          value = %obs.value,
          "dropping non-numeric observation"
        );
        skipped += 1;
        continue;
      }
    };

    let Ok(date) = NaiveDate::parse_from_str(obs.date.trim(), "%Y-%m-%d")
    else {
      tracing::warn!(catalog_key, date = %obs.date, "dropping unparseable observation date");
      skipped += 1;
      continue;
    };

    rows.push(MacroRow { catalog_key: catalog_key.to_owned(), date, value });
  }

  Ok(CleanOutput { rows, skipped })
}

// ─── Price bars ──────────────────────────────────────────────────────────────

/// Emit one row per bar with complete, finite OHLC satisfying
/// `low ≤ min(open, close) ≤ max(open, close) ≤ high`; anything else is
/// dropped.
pub fn clean_price(
  catalog_key: &str,
  envelope: &RawEnvelope,
) -> Result<CleanOutput<MicroRow>> {
  let EnvelopeItems::PriceBars { bars } = &envelope.items else {
    return Err(Error::FamilyMismatch {
      expected: SourceFamily::PriceBars,
      got:      envelope.family(),
    });
  };

  let mut rows = Vec::with_capacity(bars.len());
  let mut skipped = 0;

  for bar in bars {
    let (Some(open), Some(high), Some(low), Some(close)) =
      (bar.open, bar.high, bar.low, bar.close)
    else {
      tracing::warn!(catalog_key, date = %bar.date, "dropping bar with missing columns");
      skipped += 1;
      continue;
    };

    let row = MicroRow {
      catalog_key: catalog_key.to_owned(),
      date: bar.date.date_naive(),
      open,
      high,
      low,
      close,
      volume: bar.volume,
    };

    if !row.is_sane() {
      tracing::warn!(catalog_key, date = %bar.date, "dropping bar failing OHLC sanity");
      skipped += 1;
      continue;
    }

    rows.push(row);
  }

  Ok(CleanOutput { rows, skipped })
}

// ─── News (pure part) ────────────────────────────────────────────────────────

/// A news row minus its body: everything derivable without touching the
/// network. The pipeline's extractor fills in the body (or falls back to the
/// description) before the row is committed.
#[derive(Debug, Clone)]
pub struct NewsDraft {
  pub fingerprint:  String,
  pub catalog_key:  String,
  pub title:        String,
  pub url:          String,
  pub published_at: Option<DateTime<Utc>>,
  pub author:       Option<String>,
  pub source_name:  Option<String>,
  pub description:  Option<String>,
}

/// Map a news envelope to drafts. An envelope carrying an upstream error
/// marker yields zero drafts and one skip; articles without a title or URL
/// are dropped individually.
pub fn prepare_news(
  catalog_key: &str,
  envelope: &RawEnvelope,
) -> Result<CleanOutput<NewsDraft>> {
  let EnvelopeItems::NewsFeed { error, articles } = &envelope.items else {
    return Err(Error::FamilyMismatch {
      expected: SourceFamily::NewsFeed,
      got:      envelope.family(),
    });
  };

  if let Some(marker) = error {
    tracing::warn!(catalog_key, error_kind = %marker, "skipping news envelope with upstream error marker");
    return Ok(CleanOutput::empty_skipped());
  }

  let mut rows = Vec::with_capacity(articles.len());
  let mut skipped = 0;

  for article in articles {
    let title = article.title.trim();
    let url = article.url.trim();
    if title.is_empty() || url.is_empty() {
      tracing::warn!(catalog_key, "dropping article without title or url");
      skipped += 1;
      continue;
    }

    rows.push(NewsDraft {
      fingerprint:  url_fingerprint(url),
      catalog_key:  catalog_key.to_owned(),
      title:        title.to_owned(),
      url:          url.to_owned(),
      published_at: article.published_at.as_deref().and_then(parse_published),
      author:       non_empty(article.author.as_deref()),
      source_name:  non_empty(article.source_name.as_deref()),
      description:  non_empty(article.description.as_deref()),
    });
  }

  Ok(CleanOutput { rows, skipped })
}

fn non_empty(s: Option<&str>) -> Option<String> {
  s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(raw.trim())
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::envelope::{RawArticle, RawBar, RawObservation};

  fn macro_envelope(observations: Vec<RawObservation>) -> RawEnvelope {
    RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "series": "DGS10" }),
      items:      EnvelopeItems::MacroSeries { observations },
    }
  }

  #[test]
  fn macro_cleaner_drops_sentinels() {
    let envelope = macro_envelope(vec![
      RawObservation { date: "2025-01-02".into(), value: "4.23".into() },
      RawObservation { date: "2025-01-03".into(), value: ".".into() },
      RawObservation { date: "2025-01-06".into(), value: "4.25".into() },
      RawObservation { date: "bad-date".into(), value: "1.0".into() },
    ]);

    let out = clean_macro("METRIC_US_10Y_YIELD", &envelope).unwrap();
    assert_eq!(out.rows.len(), 2);
    assert_eq!(out.skipped, 2);
    assert_eq!(out.rows[0].value, 4.23);
    assert_eq!(
      out.rows[0].date,
      NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
    );
  }

  #[test]
  fn macro_cleaner_rejects_wrong_family() {
    let envelope = RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::Value::Null,
      items:      EnvelopeItems::PriceBars { bars: vec![] },
    };
    assert!(matches!(
      clean_macro("X", &envelope),
      Err(Error::FamilyMismatch { .. })
    ));
  }

  fn bar(open: f64, high: f64, low: f64, close: f64) -> RawBar {
    RawBar {
      date:   Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
      open:   Some(open),
      high:   Some(high),
      low:    Some(low),
      close:  Some(close),
      volume: Some(1_000),
    }
  }

  #[test]
  fn price_cleaner_enforces_ohlc_sanity() {
    let envelope = RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "ticker": "NVDA" }),
      items:      EnvelopeItems::PriceBars {
        bars: vec![
          bar(100.0, 110.0, 95.0, 108.0),
          bar(100.0, 90.0, 95.0, 108.0), // high below open
          RawBar { close: None, ..bar(1.0, 2.0, 0.5, 1.5) },
        ],
      },
    };

    let out = clean_price("NVDA", &envelope).unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.skipped, 2);
    assert!(out.rows[0].is_sane());
  }

  #[test]
  fn news_error_marker_yields_zero_rows() {
    let envelope = RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "q": "fed" }),
      items:      EnvelopeItems::NewsFeed {
        error:    Some("rate_limited".into()),
        articles: vec![],
      },
    };

    let out = prepare_news("NEWS_US_TECH_SECTOR", &envelope).unwrap();
    assert!(out.rows.is_empty());
    assert_eq!(out.skipped, 1);
  }

  #[test]
  fn news_drafts_carry_fingerprints_and_dates() {
    let envelope = RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "q": "fed" }),
      items:      EnvelopeItems::NewsFeed {
        error:    None,
        articles: vec![
          RawArticle {
            title:        "Fed holds rates".into(),
            url:          "https://example.com/fed-holds?utm_source=rss".into(),
            published_at: Some("2025-01-02T14:30:00Z".into()),
            author:       Some("A. Reporter".into()),
            source_name:  Some("Example Wire".into()),
            description:  Some("The Fed held rates steady.".into()),
          },
          RawArticle {
            title:        "".into(),
            url:          "https://example.com/untitled".into(),
            published_at: None,
            author:       None,
            source_name:  None,
            description:  None,
          },
        ],
      },
    };

    let out = prepare_news("NEWS_US_TECH_SECTOR", &envelope).unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.skipped, 1);

    let draft = &out.rows[0];
    assert_eq!(draft.fingerprint, url_fingerprint("https://example.com/fed-holds"));
    assert_eq!(
      draft.published_at,
      Some(Utc.with_ymd_and_hms(2025, 1, 2, 14, 30, 0).unwrap())
    );
  }
}
