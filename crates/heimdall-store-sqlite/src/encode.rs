//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed microsecond
//! width so lexicographic comparison in SQL equals chronological comparison —
//! the delta query and watermark advance depend on this. Dates are stored as
//! `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use heimdall_core::catalog::{CatalogEntry, SourceFamily, UpdateFrequency};
use heimdall_core::envelope::RawRecord;
use heimdall_core::watermark::Watermark;

use crate::{Error, Result};

// ─── Timestamps ──────────────────────────────────────────────────────────────

pub fn encode_ts(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Dates ───────────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String {
  d.format("%Y-%m-%d").to_string()
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `data_catalog` row.
pub struct RawCatalogRow {
  pub catalog_key:      String,
  pub source_family:    String,
  pub update_frequency: String,
  pub config_params:    String,
  pub role:             Option<String>,
  pub scope:            Option<String>,
  pub entity_name:      Option<String>,
  pub is_active:        bool,
}

impl RawCatalogRow {
  pub fn into_entry(self) -> Result<CatalogEntry> {
    Ok(CatalogEntry {
      catalog_key:      self.catalog_key,
      source_family:    SourceFamily::parse(&self.source_family)?,
      update_frequency: UpdateFrequency::parse(&self.update_frequency)?,
      config:           serde_json::from_str(&self.config_params)?,
      role:             self.role,
      scope:            self.scope,
      entity_name:      self.entity_name,
      is_active:        self.is_active,
    })
  }
}

/// Raw strings read directly from a `raw_ingestion_cache` row.
pub struct RawCacheRow {
  pub request_hash:  String,
  pub catalog_key:   String,
  pub source_family: String,
  pub raw_payload:   String,
  pub inserted_at:   String,
}

impl RawCacheRow {
  pub fn into_record(self) -> Result<RawRecord> {
    Ok(RawRecord {
      request_hash:  self.request_hash,
      catalog_key:   self.catalog_key,
      source_family: SourceFamily::parse(&self.source_family)?,
      raw_payload:   self.raw_payload,
      inserted_at:   decode_ts(&self.inserted_at)?,
    })
  }
}

/// Raw strings read directly from a `sync_watermarks` row.
pub struct RawWatermarkRow {
  pub catalog_key:      String,
  pub last_ingested_at: Option<String>,
  pub last_cleaned_at:  Option<String>,
}

impl RawWatermarkRow {
  pub fn into_watermark(self) -> Result<Watermark> {
    Ok(Watermark {
      catalog_key:      self.catalog_key,
      last_ingested_at: self
        .last_ingested_at
        .as_deref()
        .map(decode_ts)
        .transpose()?,
      last_cleaned_at:  self
        .last_cleaned_at
        .as_deref()
        .map(decode_ts)
        .transpose()?,
    })
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamp_roundtrip_and_fixed_width() {
    let a = Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();
    let b = a + chrono::Duration::microseconds(1);

    let ea = encode_ts(a);
    let eb = encode_ts(b);

    assert_eq!(decode_ts(&ea).unwrap(), a);
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb, "lexicographic order must match chronological order");
  }
}
