//! Catalog types — the registry of logical data streams.
//!
//! A catalog entry describes one upstream stream (a macro series, a ticker's
//! price bars, or a news search) together with its polling frequency and the
//! source-specific configuration blob the adapter interprets.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── SourceFamily ────────────────────────────────────────────────────────────

/// The upstream family a catalog entry belongs to. Each family has exactly
/// one adapter and one cleaner; registering a new family is a source change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFamily {
  MacroSeries,
  PriceBars,
  NewsFeed,
}

impl SourceFamily {
  pub const ALL: [SourceFamily; 3] =
    [Self::MacroSeries, Self::PriceBars, Self::NewsFeed];

  /// The string stored in the `source_family` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::MacroSeries => "MACRO_SERIES",
      Self::PriceBars => "PRICE_BARS",
      Self::NewsFeed => "NEWS_FEED",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "MACRO_SERIES" => Ok(Self::MacroSeries),
      "PRICE_BARS" => Ok(Self::PriceBars),
      "NEWS_FEED" => Ok(Self::NewsFeed),
      other => Err(Error::UnknownFamily(other.to_string())),
    }
  }
}

impl std::fmt::Display for SourceFamily {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── UpdateFrequency ─────────────────────────────────────────────────────────

/// How often a stream is polled. Also determines the time-bucket granularity
/// of the request hash: two fetches inside the same bucket hash identically
/// and therefore no-op at the raw upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateFrequency {
  Hourly,
  Daily,
  Monthly,
  Quarterly,
}

impl UpdateFrequency {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Hourly => "HOURLY",
      Self::Daily => "DAILY",
      Self::Monthly => "MONTHLY",
      Self::Quarterly => "QUARTERLY",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "HOURLY" => Ok(Self::Hourly),
      "DAILY" => Ok(Self::Daily),
      "MONTHLY" => Ok(Self::Monthly),
      "QUARTERLY" => Ok(Self::Quarterly),
      other => Err(Error::UnknownFrequency(other.to_string())),
    }
  }

  /// The normalized time window used in the request hash.
  pub fn bucket(self, at: DateTime<Utc>) -> String {
    match self {
      Self::Hourly => at.format("%Y-%m-%d-%H").to_string(),
      Self::Daily => at.format("%Y-%m-%d").to_string(),
      Self::Monthly => at.format("%Y-%m").to_string(),
      Self::Quarterly => {
        format!("{}-Q{}", at.year(), (at.month() - 1) / 3 + 1)
      }
    }
  }

  /// Look-back window for incremental fetches once a stream has a watermark.
  /// Generous enough to absorb upstream revisions at that cadence.
  pub fn lookback_days(self) -> i64 {
    match self {
      Self::Hourly => 3,
      Self::Daily => 30,
      Self::Monthly => 366,
      Self::Quarterly => 731,
    }
  }
}

impl std::fmt::Display for UpdateFrequency {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── CatalogEntry ────────────────────────────────────────────────────────────

/// One row of `data_catalog`. Created at bootstrap, flipped active by the
/// activation step, otherwise immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub catalog_key:      String,
  pub source_family:    SourceFamily,
  pub update_frequency: UpdateFrequency,
  /// Source-specific configuration, interpreted only by the adapter
  /// (series identifiers, ticker symbols, search keywords, domain filter).
  pub config:           serde_json::Value,
  /// Judgment vs validation tag; pass-through metadata, not consulted here.
  pub role:             Option<String>,
  /// Macro vs micro tag; pass-through metadata, not consulted here.
  pub scope:            Option<String>,
  pub entity_name:      Option<String>,
  pub is_active:        bool,
}

// ─── Request hash ────────────────────────────────────────────────────────────

/// Deterministic identity of one adapter fetch: catalog key + the adapter's
/// canonical query parameters + the frequency-granular time bucket.
///
/// `query_echo` objects serialize with sorted keys (serde_json's default map
/// is ordered), so the same parameters always hash the same.
pub fn request_hash(
  catalog_key: &str,
  query_echo: &serde_json::Value,
  frequency: UpdateFrequency,
  at: DateTime<Utc>,
) -> String {
  use sha2::{Digest, Sha256};

  let input = format!("{catalog_key}:{query_echo}:{}", frequency.bucket(at));
  format!("{:x}", Sha256::digest(input.as_bytes()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn family_roundtrip() {
    for family in SourceFamily::ALL {
      assert_eq!(SourceFamily::parse(family.as_str()).unwrap(), family);
    }
    assert!(SourceFamily::parse("RSS").is_err());
  }

  #[test]
  fn quarterly_bucket() {
    let f = UpdateFrequency::Quarterly;
    let jan = Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();
    let mar = Utc.with_ymd_and_hms(2025, 3, 31, 23, 0, 0).unwrap();
    let apr = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    assert_eq!(f.bucket(jan), "2025-Q1");
    assert_eq!(f.bucket(mar), "2025-Q1");
    assert_eq!(f.bucket(apr), "2025-Q2");
  }

  #[test]
  fn hash_stable_within_bucket() {
    let params = serde_json::json!({ "series": "DGS10" });
    let morning = Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap();
    let evening = Utc.with_ymd_and_hms(2025, 1, 2, 20, 0, 0).unwrap();

    let a = request_hash("METRIC_US_10Y_YIELD", &params, UpdateFrequency::Daily, morning);
    let b = request_hash("METRIC_US_10Y_YIELD", &params, UpdateFrequency::Daily, evening);
    assert_eq!(a, b);

    let next_day = Utc.with_ymd_and_hms(2025, 1, 3, 8, 0, 0).unwrap();
    let c = request_hash("METRIC_US_10Y_YIELD", &params, UpdateFrequency::Daily, next_day);
    assert_ne!(a, c);
  }

  #[test]
  fn hash_sensitive_to_key_and_params() {
    let at = Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap();
    let p1 = serde_json::json!({ "series": "DGS10" });
    let p2 = serde_json::json!({ "series": "DGS2" });

    let a = request_hash("A", &p1, UpdateFrequency::Daily, at);
    assert_ne!(a, request_hash("B", &p1, UpdateFrequency::Daily, at));
    assert_ne!(a, request_hash("A", &p2, UpdateFrequency::Daily, at));
  }
}
