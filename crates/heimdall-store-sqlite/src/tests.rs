//! Integration tests for [`Store`] against an in-memory database.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use heimdall_core::catalog::{CatalogEntry, SourceFamily, UpdateFrequency};
use heimdall_core::silver::{MacroRow, MicroRow, NewsRow};
use heimdall_core::watermark::cleaning_key;

use crate::{SilverBatch, Store};

async fn store() -> Store {
  Store::open_in_memory().await.expect("in-memory store")
}

fn entry(key: &str, family: SourceFamily, frequency: UpdateFrequency) -> CatalogEntry {
  CatalogEntry {
    catalog_key:      key.to_owned(),
    source_family:    family,
    update_frequency: frequency,
    config:           serde_json::json!({ "series": "DGS10" }),
    role:             Some("V".into()),
    scope:            Some("MACRO".into()),
    entity_name:      Some("US 10Y Treasury Yield".into()),
    is_active:        false,
  }
}

fn macro_row(key: &str, day: u32, value: f64) -> MacroRow {
  MacroRow {
    catalog_key: key.to_owned(),
    date:        NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
    value,
  }
}

fn news_row(fingerprint: &str, title: &str) -> NewsRow {
  NewsRow {
    fingerprint:  fingerprint.to_owned(),
    catalog_key:  "NEWS_US_TECH_SECTOR".to_owned(),
    title:        title.to_owned(),
    url:          "https://example.com/a".to_owned(),
    published_at: Some(Utc.with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap()),
    author:       None,
    source_name:  Some("Example Wire".into()),
    body:         Some("Body text.".into()),
  }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_roundtrip() {
  let s = store().await;
  let e = entry("METRIC_US_10Y_YIELD", SourceFamily::MacroSeries, UpdateFrequency::Daily);
  s.upsert_entry(&e).await.unwrap();

  let fetched = s.entry("METRIC_US_10Y_YIELD").await.unwrap().unwrap();
  assert_eq!(fetched.source_family, SourceFamily::MacroSeries);
  assert_eq!(fetched.update_frequency, UpdateFrequency::Daily);
  assert_eq!(fetched.config["series"], "DGS10");
  assert!(!fetched.is_active);

  assert!(s.entry("MISSING").await.unwrap().is_none());
}

#[tokio::test]
async fn active_entries_filtered_by_frequency() {
  let s = store().await;
  s.upsert_entry(&entry("A", SourceFamily::MacroSeries, UpdateFrequency::Daily))
    .await
    .unwrap();
  s.upsert_entry(&entry("B", SourceFamily::PriceBars, UpdateFrequency::Hourly))
    .await
    .unwrap();
  s.upsert_entry(&entry("C", SourceFamily::NewsFeed, UpdateFrequency::Daily))
    .await
    .unwrap();

  s.activate_entry("A").await.unwrap();
  s.activate_entry("B").await.unwrap();

  let daily = s.active_entries(Some(UpdateFrequency::Daily)).await.unwrap();
  assert_eq!(daily.len(), 1);
  assert_eq!(daily[0].catalog_key, "A");

  let all = s.active_entries(None).await.unwrap();
  assert_eq!(all.len(), 2);

  let inactive = s.inactive_entries().await.unwrap();
  assert_eq!(inactive.len(), 1);
  assert_eq!(inactive[0].catalog_key, "C");
}

#[tokio::test]
async fn activation_creates_watermark_row() {
  let s = store().await;
  s.upsert_entry(&entry("A", SourceFamily::MacroSeries, UpdateFrequency::Daily))
    .await
    .unwrap();
  assert!(s.watermark("A").await.unwrap().is_none());

  s.activate_entry("A").await.unwrap();

  let wm = s.watermark("A").await.unwrap().unwrap();
  assert!(wm.last_ingested_at.is_none());
  assert!(wm.last_cleaned_at.is_none());
}

// ─── Bronze ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn raw_upsert_is_idempotent() {
  let s = store().await;

  let first = s
    .upsert_raw("hash-1", "A", SourceFamily::MacroSeries, "{}")
    .await
    .unwrap();
  let second = s
    .upsert_raw("hash-1", "A", SourceFamily::MacroSeries, "{}")
    .await
    .unwrap();

  assert!(first);
  assert!(!second);
  assert_eq!(s.raw_count(SourceFamily::MacroSeries).await.unwrap(), 1);
}

#[tokio::test]
async fn record_fetch_advances_ingestion_watermark_even_on_hash_match() {
  let s = store().await;

  let inserted = s
    .record_fetch("hash-1", "A", SourceFamily::MacroSeries, "{}")
    .await
    .unwrap();
  assert!(inserted);

  let first_mark = s.watermark("A").await.unwrap().unwrap().last_ingested_at.unwrap();

  let inserted = s
    .record_fetch("hash-1", "A", SourceFamily::MacroSeries, "{}")
    .await
    .unwrap();
  assert!(!inserted, "same bucket hash must no-op at the upsert");

  let second_mark = s.watermark("A").await.unwrap().unwrap().last_ingested_at.unwrap();
  assert!(second_mark >= first_mark);
  assert_eq!(s.raw_count(SourceFamily::MacroSeries).await.unwrap(), 1);
}

#[tokio::test]
async fn delta_batch_orders_caps_and_respects_watermark() {
  let s = store().await;

  for i in 0..5 {
    s.upsert_raw(&format!("hash-{i}"), "A", SourceFamily::NewsFeed, "{}")
      .await
      .unwrap();
  }

  let all = s.delta_batch(SourceFamily::NewsFeed, None, 100).await.unwrap();
  assert_eq!(all.len(), 5);
  for pair in all.windows(2) {
    assert!(pair[0].inserted_at <= pair[1].inserted_at);
  }

  let capped = s.delta_batch(SourceFamily::NewsFeed, None, 2).await.unwrap();
  assert_eq!(capped.len(), 2);
  assert_eq!(capped[0].request_hash, all[0].request_hash);

  // Nothing is newer than the newest row.
  let newest = all.last().unwrap().inserted_at;
  let after = s
    .delta_batch(SourceFamily::NewsFeed, Some(newest), 100)
    .await
    .unwrap();
  assert!(after.is_empty());

  // Other families see nothing.
  let other = s.delta_batch(SourceFamily::MacroSeries, None, 100).await.unwrap();
  assert!(other.is_empty());
}

// ─── Silver + atomic commit ──────────────────────────────────────────────────

#[tokio::test]
async fn commit_clean_batch_writes_rows_and_watermark_together() {
  let s = store().await;
  let mark = Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();

  s.commit_clean_batch(
    SourceFamily::MacroSeries,
    SilverBatch::Macro(vec![macro_row("A", 2, 4.23), macro_row("A", 3, 4.25)]),
    mark,
  )
  .await
  .unwrap();

  assert_eq!(s.silver_count(SourceFamily::MacroSeries).await.unwrap(), 2);

  let wm = s
    .watermark(&cleaning_key(SourceFamily::MacroSeries))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(wm.last_cleaned_at, Some(mark));
}

#[tokio::test]
async fn cleaning_watermark_never_regresses() {
  let s = store().await;
  let newer = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
  let older = newer - Duration::days(1);

  s.commit_clean_batch(SourceFamily::MacroSeries, SilverBatch::Macro(vec![]), newer)
    .await
    .unwrap();
  s.commit_clean_batch(SourceFamily::MacroSeries, SilverBatch::Macro(vec![]), older)
    .await
    .unwrap();

  let wm = s
    .watermark(&cleaning_key(SourceFamily::MacroSeries))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(wm.last_cleaned_at, Some(newer));
}

#[tokio::test]
async fn macro_upsert_replaces_on_rederivation() {
  let s = store().await;

  s.upsert_macro_rows(vec![macro_row("A", 2, 4.23)]).await.unwrap();
  s.upsert_macro_rows(vec![macro_row("A", 2, 4.99)]).await.unwrap();

  assert_eq!(s.silver_count(SourceFamily::MacroSeries).await.unwrap(), 1);

  let value: f64 = s
    .connection()
    .call(|conn| {
      Ok(conn.query_row(
        "SELECT value FROM timeseries_macro WHERE catalog_key = 'A'",
        [],
        |row| row.get(0),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(value, 4.99);
}

#[tokio::test]
async fn micro_upsert_dedups_on_key_and_date() {
  let s = store().await;
  let row = MicroRow {
    catalog_key: "NVDA".into(),
    date:        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
    open:        100.0,
    high:        110.0,
    low:         95.0,
    close:       108.0,
    volume:      Some(1_000),
  };

  s.upsert_micro_rows(vec![row.clone()]).await.unwrap();
  s.upsert_micro_rows(vec![MicroRow { close: 109.0, ..row }]).await.unwrap();

  assert_eq!(s.silver_count(SourceFamily::PriceBars).await.unwrap(), 1);
}

#[tokio::test]
async fn news_upsert_replaces_metadata_but_preserves_analyst_slots() {
  let s = store().await;

  s.upsert_news_rows(vec![news_row("fp-1", "Original title")])
    .await
    .unwrap();

  // A downstream consumer fills the sentiment slot out of band.
  s.connection()
    .call(|conn| {
      conn.execute(
        "UPDATE news_intel_pool SET sentiment_score = 0.8, ai_summary = 'bullish'
         WHERE fingerprint = 'fp-1'",
        [],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  // The same fingerprint arrives again with corrected metadata.
  s.upsert_news_rows(vec![news_row("fp-1", "Corrected title")])
    .await
    .unwrap();

  let (count, title, sentiment, summary): (i64, String, Option<f64>, Option<String>) = s
    .connection()
    .call(|conn| {
      Ok(conn.query_row(
        "SELECT COUNT(*), title, sentiment_score, ai_summary FROM news_intel_pool",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )?)
    })
    .await
    .unwrap();

  assert_eq!(count, 1);
  assert_eq!(title, "Corrected title");
  assert_eq!(sentiment, Some(0.8));
  assert_eq!(summary.as_deref(), Some("bullish"));
}

// ─── On-disk persistence ─────────────────────────────────────────────────────

#[tokio::test]
async fn reopened_store_sees_committed_data() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("heimdall.db");

  {
    let s = Store::open(&path).await.unwrap();
    s.upsert_raw("hash-1", "A", SourceFamily::MacroSeries, "{}")
      .await
      .unwrap();
  }

  let s = Store::open(&path).await.unwrap();
  assert_eq!(s.raw_count(SourceFamily::MacroSeries).await.unwrap(), 1);
}

// ─── Watermark reset ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_clears_one_family_or_all() {
  let s = store().await;
  let mark = Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();

  for family in SourceFamily::ALL {
    s.commit_clean_batch(family, SilverBatch::Macro(vec![]), mark)
      .await
      .unwrap();
  }

  s.reset_cleaning_watermark(Some(SourceFamily::NewsFeed)).await.unwrap();

  let news = s
    .watermark(&cleaning_key(SourceFamily::NewsFeed))
    .await
    .unwrap()
    .unwrap();
  assert!(news.last_cleaned_at.is_none());

  let macro_wm = s
    .watermark(&cleaning_key(SourceFamily::MacroSeries))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(macro_wm.last_cleaned_at, Some(mark));

  s.reset_cleaning_watermark(None).await.unwrap();
  for wm in s.cleaning_watermarks().await.unwrap() {
    assert!(wm.last_cleaned_at.is_none());
  }
}
