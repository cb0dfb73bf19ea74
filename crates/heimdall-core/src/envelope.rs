//! The canonical raw envelope — the shape every adapter normalizes vendor
//! responses into before they are persisted to the Bronze tier.
//!
//! Envelopes are stored verbatim as JSON in `raw_ingestion_cache.raw_payload`
//! and never mutated. They may carry upstream error markers (a rate-limited
//! news fetch is still a valid envelope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SourceFamily;
use crate::Result;

// ─── Items ───────────────────────────────────────────────────────────────────

/// One observation of a macro-economic series. The value is kept as the raw
/// string: sentinel non-numeric markers (e.g. `"."`) pass through unfiltered
/// and are dropped by the cleaner, not the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
  pub date:  String,
  pub value: String,
}

/// One daily price bar, date normalized to UTC midnight by the adapter.
/// Columns missing upstream stay `None` and cause the cleaner to drop the bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
  pub date:   DateTime<Utc>,
  pub open:   Option<f64>,
  pub high:   Option<f64>,
  pub low:    Option<f64>,
  pub close:  Option<f64>,
  pub volume: Option<i64>,
}

/// Article metadata as returned by the news feed; body text is a cleaner
/// concern and is never present here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
  pub title:        String,
  pub url:          String,
  pub published_at: Option<String>,
  pub author:       Option<String>,
  pub source_name:  Option<String>,
  pub description:  Option<String>,
}

/// Source-specific payload of an envelope. The variant tag doubles as the
/// family discriminant when deserializing Bronze rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeItems {
  MacroSeries {
    observations: Vec<RawObservation>,
  },
  PriceBars {
    bars: Vec<RawBar>,
  },
  NewsFeed {
    /// Upstream error marker (e.g. `"rate_limited"`). An envelope carrying
    /// one is persisted as-is; the cleaner yields zero rows for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error:    Option<String>,
    articles: Vec<RawArticle>,
  },
}

impl EnvelopeItems {
  pub fn family(&self) -> SourceFamily {
    match self {
      Self::MacroSeries { .. } => SourceFamily::MacroSeries,
      Self::PriceBars { .. } => SourceFamily::PriceBars,
      Self::NewsFeed { .. } => SourceFamily::NewsFeed,
    }
  }

  /// Number of items carried, regardless of family.
  pub fn len(&self) -> usize {
    match self {
      Self::MacroSeries { observations } => observations.len(),
      Self::PriceBars { bars } => bars.len(),
      Self::NewsFeed { articles, .. } => articles.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// Exactly one canonical envelope is produced per successful adapter
/// invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
  pub fetched_at: DateTime<Utc>,
  /// The effective query parameters, echoed back for request-hash derivation.
  pub query_echo: serde_json::Value,
  pub items:      EnvelopeItems,
}

impl RawEnvelope {
  pub fn family(&self) -> SourceFamily {
    self.items.family()
  }

  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string(self)?)
  }

  pub fn from_json(raw: &str) -> Result<Self> {
    Ok(serde_json::from_str(raw)?)
  }
}

// ─── RawRecord ───────────────────────────────────────────────────────────────

/// One row of `raw_ingestion_cache`, as read back by the cleaning pipeline.
#[derive(Debug, Clone)]
pub struct RawRecord {
  pub request_hash:  String,
  pub catalog_key:   String,
  pub source_family: SourceFamily,
  pub raw_payload:   String,
  pub inserted_at:   DateTime<Utc>,
}

impl RawRecord {
  pub fn envelope(&self) -> Result<RawEnvelope> {
    RawEnvelope::from_json(&self.raw_payload)
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn news_error_envelope_roundtrip() {
    let envelope = RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "q": "semiconductors" }),
      items:      EnvelopeItems::NewsFeed {
        error:    Some("rate_limited".into()),
        articles: vec![],
      },
    };

    let json = envelope.to_json().unwrap();
    let back = RawEnvelope::from_json(&json).unwrap();

    assert_eq!(back.family(), SourceFamily::NewsFeed);
    assert!(matches!(
      back.items,
      EnvelopeItems::NewsFeed { error: Some(ref e), ref articles }
        if e == "rate_limited" && articles.is_empty()
    ));
  }

  #[test]
  fn macro_envelope_roundtrip_preserves_sentinels() {
    let envelope = RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "series": "DGS10" }),
      items:      EnvelopeItems::MacroSeries {
        observations: vec![
          RawObservation { date: "2025-01-02".into(), value: "4.23".into() },
          RawObservation { date: "2025-01-03".into(), value: ".".into() },
        ],
      },
    };

    let back = RawEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
    let EnvelopeItems::MacroSeries { observations } = back.items else {
      panic!("wrong family");
    };
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[1].value, ".");
  }
}
