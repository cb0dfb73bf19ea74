//! Sync watermarks — the per-stream, per-stage checkpoints that drive
//! differential processing.
//!
//! Ingestion advances `last_ingested_at` per catalog key; cleaning advances
//! `last_cleaned_at` on a synthetic per-family key so reprocessing a family
//! is a single-row reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SourceFamily;

/// One row of `sync_watermarks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Watermark {
  pub catalog_key:      String,
  pub last_ingested_at: Option<DateTime<Utc>>,
  pub last_cleaned_at:  Option<DateTime<Utc>>,
}

/// The synthetic catalog key carrying a family's cleaning watermark.
pub fn cleaning_key(family: SourceFamily) -> String {
  format!("SYSTEM_CLEANING_{}", family.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cleaning_keys_are_distinct_per_family() {
    assert_eq!(
      cleaning_key(SourceFamily::NewsFeed),
      "SYSTEM_CLEANING_NEWS_FEED"
    );
    assert_ne!(
      cleaning_key(SourceFamily::MacroSeries),
      cleaning_key(SourceFamily::PriceBars)
    );
  }
}
