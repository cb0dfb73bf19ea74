//! [`Store`] — the SQLite persistence gateway.
//!
//! One instance owns the writer connection for the whole process. All writes
//! funnel through it, so at most one transaction is ever open against the
//! store; concurrent external readers are tolerated via WAL.

use std::path::Path;

use chrono::{DateTime, Utc};
use heimdall_core::catalog::{CatalogEntry, SourceFamily, UpdateFrequency};
use heimdall_core::envelope::RawRecord;
use heimdall_core::silver::{MacroRow, MicroRow, NewsRow};
use heimdall_core::watermark::{cleaning_key, Watermark};
use rusqlite::OptionalExtension as _;

use crate::encode::{
  encode_date, encode_ts, RawCacheRow, RawCatalogRow, RawWatermarkRow,
};
use crate::schema::SCHEMA;
use crate::Result;

// ─── Silver batches ──────────────────────────────────────────────────────────

/// One cleaning batch's output, ready for atomic commit.
#[derive(Debug, Clone)]
pub enum SilverBatch {
  Macro(Vec<MacroRow>),
  Micro(Vec<MicroRow>),
  News(Vec<NewsRow>),
}

impl SilverBatch {
  pub fn len(&self) -> usize {
    match self {
      Self::Macro(rows) => rows.len(),
      Self::Micro(rows) => rows.len(),
      Self::News(rows) => rows.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// The Heimdall store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct Store {
  conn: tokio_rusqlite::Connection,
}

impl Store {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Catalog ───────────────────────────────────────────────────────────────

  /// Insert or replace a catalog entry (idempotent; used at bootstrap).
  pub async fn upsert_entry(&self, entry: &CatalogEntry) -> Result<()> {
    let catalog_key = entry.catalog_key.clone();
    let family = entry.source_family.as_str();
    let frequency = entry.update_frequency.as_str();
    let config = entry.config.to_string();
    let role = entry.role.clone();
    let scope = entry.scope.clone();
    let entity_name = entry.entity_name.clone();
    let is_active = entry.is_active;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO data_catalog (
             catalog_key, source_family, update_frequency, config_params,
             role, scope, entity_name, is_active
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            catalog_key,
            family,
            frequency,
            config,
            role,
            scope,
            entity_name,
            is_active,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Retrieve a catalog entry by key. Returns `None` if not found.
  pub async fn entry(&self, catalog_key: &str) -> Result<Option<CatalogEntry>> {
    let key = catalog_key.to_owned();

    let raw: Option<RawCatalogRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT catalog_key, source_family, update_frequency,
                      config_params, role, scope, entity_name, is_active
               FROM data_catalog WHERE catalog_key = ?1",
              rusqlite::params![key],
              catalog_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCatalogRow::into_entry).transpose()
  }

  /// Active catalog entries, optionally restricted to one update frequency.
  pub async fn active_entries(
    &self,
    frequency: Option<UpdateFrequency>,
  ) -> Result<Vec<CatalogEntry>> {
    let freq_str = frequency.map(|f| f.as_str().to_owned());

    let raws: Vec<RawCatalogRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT catalog_key, source_family, update_frequency,
                  config_params, role, scope, entity_name, is_active
           FROM data_catalog
           WHERE is_active = 1
             AND (?1 IS NULL OR update_frequency = ?1)
           ORDER BY source_family, catalog_key",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![freq_str], catalog_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCatalogRow::into_entry).collect()
  }

  /// Inactive catalog entries — the activation step's work list.
  pub async fn inactive_entries(&self) -> Result<Vec<CatalogEntry>> {
    let raws: Vec<RawCatalogRow> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT catalog_key, source_family, update_frequency,
                  config_params, role, scope, entity_name, is_active
           FROM data_catalog
           WHERE is_active = 0
           ORDER BY source_family, catalog_key",
        )?;
        let rows = stmt
          .query_map([], catalog_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCatalogRow::into_entry).collect()
  }

  /// Flip a catalog entry's active flag and ensure its watermark row exists,
  /// in one transaction.
  pub async fn activate_entry(&self, catalog_key: &str) -> Result<()> {
    let key = catalog_key.to_owned();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE data_catalog SET is_active = 1 WHERE catalog_key = ?1",
          rusqlite::params![key],
        )?;
        tx.execute(
          "INSERT OR IGNORE INTO sync_watermarks (catalog_key) VALUES (?1)",
          rusqlite::params![key],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Bronze ────────────────────────────────────────────────────────────────

  /// Insert a raw row keyed by `request_hash`; a no-op on an existing match.
  /// Returns whether a row was actually written.
  pub async fn upsert_raw(
    &self,
    request_hash: &str,
    catalog_key: &str,
    family: SourceFamily,
    raw_payload: &str,
  ) -> Result<bool> {
    let hash = request_hash.to_owned();
    let key = catalog_key.to_owned();
    let family_str = family.as_str();
    let payload = raw_payload.to_owned();
    let inserted_at = encode_ts(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT OR IGNORE INTO raw_ingestion_cache
             (request_hash, catalog_key, source_family, raw_payload, inserted_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![hash, key, family_str, payload, inserted_at],
        )?;
        Ok(n > 0)
      })
      .await?;
    Ok(inserted)
  }

  /// One ingestion commit: upsert the raw row and advance the catalog's
  /// `last_ingested_at`, in a single transaction. Returns whether the raw
  /// row was actually written (false on an idempotent hash match — the
  /// watermark still advances).
  pub async fn record_fetch(
    &self,
    request_hash: &str,
    catalog_key: &str,
    family: SourceFamily,
    raw_payload: &str,
  ) -> Result<bool> {
    let hash = request_hash.to_owned();
    let key = catalog_key.to_owned();
    let family_str = family.as_str();
    let payload = raw_payload.to_owned();
    let now = encode_ts(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "INSERT OR IGNORE INTO raw_ingestion_cache
             (request_hash, catalog_key, source_family, raw_payload, inserted_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![hash, key, family_str, payload, now],
        )?;
        tx.execute(
          "INSERT OR IGNORE INTO sync_watermarks (catalog_key) VALUES (?1)",
          rusqlite::params![key],
        )?;
        tx.execute(
          "UPDATE sync_watermarks SET last_ingested_at = ?1 WHERE catalog_key = ?2",
          rusqlite::params![now, key],
        )?;
        tx.commit()?;
        Ok(n > 0)
      })
      .await?;
    Ok(inserted)
  }

  /// The cleaning delta: raw rows of `family` strictly newer than `since`
  /// (all rows when `since` is `None`), oldest first, capped at `limit`.
  pub async fn delta_batch(
    &self,
    family: SourceFamily,
    since: Option<DateTime<Utc>>,
    limit: usize,
  ) -> Result<Vec<RawRecord>> {
    let family_str = family.as_str();
    let since_str = since.map(encode_ts);
    let limit = limit as i64;

    let raws: Vec<RawCacheRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT request_hash, catalog_key, source_family, raw_payload, inserted_at
           FROM raw_ingestion_cache
           WHERE source_family = ?1
             AND (?2 IS NULL OR inserted_at > ?2)
           ORDER BY inserted_at ASC
           LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![family_str, since_str, limit], |row| {
            Ok(RawCacheRow {
              request_hash:  row.get(0)?,
              catalog_key:   row.get(1)?,
              source_family: row.get(2)?,
              raw_payload:   row.get(3)?,
              inserted_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCacheRow::into_record).collect()
  }

  /// Newest `inserted_at` of a family's raw rows, for the verify report.
  pub async fn max_raw_inserted_at(
    &self,
    family: SourceFamily,
  ) -> Result<Option<DateTime<Utc>>> {
    let family_str = family.as_str();

    let max: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT MAX(inserted_at) FROM raw_ingestion_cache WHERE source_family = ?1",
          rusqlite::params![family_str],
          |row| row.get(0),
        )?)
      })
      .await?;

    max
      .as_deref()
      .map(crate::encode::decode_ts)
      .transpose()
  }

  pub async fn raw_count(&self, family: SourceFamily) -> Result<i64> {
    let family_str = family.as_str();
    let count = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM raw_ingestion_cache WHERE source_family = ?1",
          rusqlite::params![family_str],
          |row| row.get(0),
        )?)
      })
      .await?;
    Ok(count)
  }

  // ── Watermarks ────────────────────────────────────────────────────────────

  pub async fn watermark(&self, catalog_key: &str) -> Result<Option<Watermark>> {
    let key = catalog_key.to_owned();

    let raw: Option<RawWatermarkRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT catalog_key, last_ingested_at, last_cleaned_at
               FROM sync_watermarks WHERE catalog_key = ?1",
              rusqlite::params![key],
              |row| {
                Ok(RawWatermarkRow {
                  catalog_key:      row.get(0)?,
                  last_ingested_at: row.get(1)?,
                  last_cleaned_at:  row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawWatermarkRow::into_watermark).transpose()
  }

  /// Cleaning watermarks for all families, for `--show-watermarks`.
  pub async fn cleaning_watermarks(&self) -> Result<Vec<Watermark>> {
    let mut out = Vec::with_capacity(SourceFamily::ALL.len());
    for family in SourceFamily::ALL {
      let key = cleaning_key(family);
      out.push(self.watermark(&key).await?.unwrap_or(Watermark {
        catalog_key: key,
        ..Watermark::default()
      }));
    }
    Ok(out)
  }

  /// Null out `last_cleaned_at` so the next clean reprocesses every raw row
  /// of the family (or of all families).
  pub async fn reset_cleaning_watermark(
    &self,
    family: Option<SourceFamily>,
  ) -> Result<()> {
    let keys: Vec<String> = match family {
      Some(f) => vec![cleaning_key(f)],
      None => SourceFamily::ALL.iter().copied().map(cleaning_key).collect(),
    };

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "UPDATE sync_watermarks SET last_cleaned_at = NULL WHERE catalog_key = ?1",
          )?;
          for key in &keys {
            stmt.execute(rusqlite::params![key])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Silver ────────────────────────────────────────────────────────────────

  /// Commit one cleaning batch atomically: upsert every Silver row, then
  /// advance the family's cleaning watermark to `new_watermark`. Either all
  /// of it becomes visible or none of it does; the advance is guarded so the
  /// watermark never moves backwards.
  pub async fn commit_clean_batch(
    &self,
    family: SourceFamily,
    batch: SilverBatch,
    new_watermark: DateTime<Utc>,
  ) -> Result<()> {
    let key = cleaning_key(family);
    let ts = encode_ts(new_watermark);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        match &batch {
          SilverBatch::Macro(rows) => insert_macro_rows(&tx, rows)?,
          SilverBatch::Micro(rows) => insert_micro_rows(&tx, rows)?,
          SilverBatch::News(rows) => insert_news_rows(&tx, rows)?,
        }
        tx.execute(
          "INSERT OR IGNORE INTO sync_watermarks (catalog_key) VALUES (?1)",
          rusqlite::params![key],
        )?;
        tx.execute(
          "UPDATE sync_watermarks SET last_cleaned_at = ?1
           WHERE catalog_key = ?2
             AND (last_cleaned_at IS NULL OR last_cleaned_at < ?1)",
          rusqlite::params![ts, key],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Batched upsert into `timeseries_macro`, outside any cleaning batch.
  pub async fn upsert_macro_rows(&self, rows: Vec<MacroRow>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        insert_macro_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Batched upsert into `timeseries_micro`, outside any cleaning batch.
  pub async fn upsert_micro_rows(&self, rows: Vec<MicroRow>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        insert_micro_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Batched upsert into `news_intel_pool`, outside any cleaning batch.
  pub async fn upsert_news_rows(&self, rows: Vec<NewsRow>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        insert_news_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Look up one news row by fingerprint — dedup checks and spot
  /// verification.
  pub async fn news_row(&self, fingerprint: &str) -> Result<Option<NewsRow>> {
    let fp = fingerprint.to_owned();

    let raw: Option<(NewsRow, Option<String>)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT fingerprint, catalog_key, title, url, published_at,
                      author, source_name, body
               FROM news_intel_pool WHERE fingerprint = ?1",
              rusqlite::params![fp],
              |row| {
                let published_at: Option<String> = row.get(4)?;
                Ok((
                  NewsRow {
                    fingerprint:  row.get(0)?,
                    catalog_key:  row.get(1)?,
                    title:        row.get(2)?,
                    url:          row.get(3)?,
                    published_at: None,
                    author:       row.get(5)?,
                    source_name:  row.get(6)?,
                    body:         row.get(7)?,
                  },
                  published_at,
                ))
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(mut row, published_at)| {
        row.published_at = published_at
          .as_deref()
          .map(crate::encode::decode_ts)
          .transpose()?;
        Ok(row)
      })
      .transpose()
  }

  /// Silver row count for a family's target table, for the verify report.
  pub async fn silver_count(&self, family: SourceFamily) -> Result<i64> {
    let sql = match family {
      SourceFamily::MacroSeries => "SELECT COUNT(*) FROM timeseries_macro",
      SourceFamily::PriceBars => "SELECT COUNT(*) FROM timeseries_micro",
      SourceFamily::NewsFeed => "SELECT COUNT(*) FROM news_intel_pool",
    };
    let count = self
      .conn
      .call(move |conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
      .await?;
    Ok(count)
  }

  /// Escape hatch for tests and ad-hoc inspection.
  #[cfg(test)]
  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection {
    &self.conn
  }
}

// ─── Row mappers and batched inserts ─────────────────────────────────────────

fn catalog_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCatalogRow> {
  Ok(RawCatalogRow {
    catalog_key:      row.get(0)?,
    source_family:    row.get(1)?,
    update_frequency: row.get(2)?,
    config_params:    row.get(3)?,
    role:             row.get(4)?,
    scope:            row.get(5)?,
    entity_name:      row.get(6)?,
    is_active:        row.get(7)?,
  })
}

fn insert_macro_rows(
  tx: &rusqlite::Transaction<'_>,
  rows: &[MacroRow],
) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare(
    "INSERT OR REPLACE INTO timeseries_macro (catalog_key, date, value)
     VALUES (?1, ?2, ?3)",
  )?;
  for row in rows {
    stmt.execute(rusqlite::params![
      row.catalog_key,
      encode_date(row.date),
      row.value,
    ])?;
  }
  Ok(())
}

fn insert_micro_rows(
  tx: &rusqlite::Transaction<'_>,
  rows: &[MicroRow],
) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare(
    "INSERT OR REPLACE INTO timeseries_micro
       (catalog_key, date, val_open, val_high, val_low, val_close, val_volume)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
  )?;
  for row in rows {
    stmt.execute(rusqlite::params![
      row.catalog_key,
      encode_date(row.date),
      row.open,
      row.high,
      row.low,
      row.close,
      row.volume,
    ])?;
  }
  Ok(())
}

// A later observation of the same fingerprint replaces the metadata columns
// (news metadata may be corrected upstream) but leaves the sentiment and
// summary slots alone — those belong to downstream consumers.
fn insert_news_rows(
  tx: &rusqlite::Transaction<'_>,
  rows: &[NewsRow],
) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare(
    "INSERT INTO news_intel_pool
       (fingerprint, catalog_key, title, url, published_at, author, source_name, body)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(fingerprint) DO UPDATE SET
       catalog_key  = excluded.catalog_key,
       title        = excluded.title,
       url          = excluded.url,
       published_at = excluded.published_at,
       author       = excluded.author,
       source_name  = excluded.source_name,
       body         = excluded.body",
  )?;
  for row in rows {
    stmt.execute(rusqlite::params![
      row.fingerprint,
      row.catalog_key,
      row.title,
      row.url,
      row.published_at.map(encode_ts),
      row.author,
      row.source_name,
      row.body,
    ])?;
  }
  Ok(())
}
