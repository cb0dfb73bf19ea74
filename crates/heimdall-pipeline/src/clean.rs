//! The cleaning pipeline: Bronze → Silver differential driver.
//!
//! Per family: read the cleaning watermark, pull the Bronze delta in
//! bounded batches, dispatch records to the family's cleaner, and commit the
//! Silver rows together with the watermark advance in one transaction.
//! Rolled-back batches leave the watermark untouched, so the next invocation
//! retries the same delta; upsert semantics make that idempotent.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use heimdall_core::catalog::SourceFamily;
use heimdall_core::clean::{clean_macro, clean_price, prepare_news, NewsDraft};
use heimdall_core::envelope::RawRecord;
use heimdall_core::silver::NewsRow;
use heimdall_core::watermark::{cleaning_key, Watermark};
use heimdall_fetch::Shutdown;
use heimdall_store_sqlite::{SilverBatch, Store};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::extract::BodyExtractor;
use crate::Result;

/// Bronze rows pulled per delta query; bounds memory per batch.
pub const DEFAULT_BATCH_LIMIT: usize = 100;
/// Concurrent body extractions within one news batch.
const EXTRACT_CONCURRENCY: usize = 4;

// ─── Stats and reports ───────────────────────────────────────────────────────

/// Counters for one family's cleaning run.
#[derive(Debug)]
pub struct FamilyCleanStats {
  pub family:         SourceFamily,
  /// Bronze rows pulled from the delta.
  pub input_records:  usize,
  /// Silver rows handed to the committer.
  pub rows_committed: usize,
  /// Items dropped by cleaners plus envelopes skipped outright
  /// (e.g. rate-limit markers).
  pub skipped:        usize,
  /// Bronze rows whose envelope failed to decode or clean.
  pub failed:         usize,
  pub batches:        usize,
  pub duration_ms:    u64,
  pub dry_run:        bool,
}

impl FamilyCleanStats {
  fn new(family: SourceFamily, dry_run: bool) -> Self {
    Self {
      family,
      input_records: 0,
      rows_committed: 0,
      skipped: 0,
      failed: 0,
      batches: 0,
      duration_ms: 0,
      dry_run,
    }
  }
}

/// Per-family consistency check: Silver counts plus watermark alignment.
#[derive(Debug)]
pub struct FamilyVerify {
  pub family:          SourceFamily,
  pub raw_rows:        i64,
  pub silver_rows:     i64,
  pub last_cleaned_at: Option<DateTime<Utc>>,
  pub max_inserted_at: Option<DateTime<Utc>>,
  /// True when the watermark equals the newest Bronze `inserted_at`
  /// (or both are absent).
  pub aligned:         bool,
}

#[derive(Debug)]
pub struct VerifyReport {
  pub families: Vec<FamilyVerify>,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct CleaningPipeline {
  store:       Store,
  extractor:   Arc<dyn BodyExtractor>,
  shutdown:    Shutdown,
  batch_limit: usize,
}

impl CleaningPipeline {
  pub fn new(
    store: Store,
    extractor: Arc<dyn BodyExtractor>,
    shutdown: Shutdown,
  ) -> Self {
    Self { store, extractor, shutdown, batch_limit: DEFAULT_BATCH_LIMIT }
  }

  pub fn with_batch_limit(mut self, limit: usize) -> Self {
    self.batch_limit = limit.max(1);
    self
  }

  /// Clean each family in turn. A family whose batch commit fails is logged
  /// and abandoned for this run; the others continue.
  pub async fn clean_all(
    &self,
    families: &[SourceFamily],
    dry_run: bool,
  ) -> Vec<FamilyCleanStats> {
    let mut all = Vec::with_capacity(families.len());
    for family in families {
      match self.clean_family(*family, dry_run).await {
        Ok(stats) => all.push(stats),
        Err(e) => {
          tracing::error!(
            source_family = %family,
            status = "rolled_back",
            error_kind = "storage_failure",
            error = %e,
            "cleaning batch rolled back; watermark unchanged"
          );
          all.push(FamilyCleanStats::new(*family, dry_run));
        }
      }
    }
    all
  }

  /// Drive the differential loop for one family until the delta runs dry.
  pub async fn clean_family(
    &self,
    family: SourceFamily,
    dry_run: bool,
  ) -> Result<FamilyCleanStats> {
    let started = Instant::now();
    let mut stats = FamilyCleanStats::new(family, dry_run);

    let key = cleaning_key(family);
    let mut since = self
      .store
      .watermark(&key)
      .await?
      .and_then(|w| w.last_cleaned_at);

    loop {
      let delta = self.store.delta_batch(family, since, self.batch_limit).await?;

      let Some(last) = delta.last() else {
        if stats.input_records == 0 {
          tracing::info!(source_family = %family, "no new records");
        }
        break;
      };
      let batch_watermark = last.inserted_at;
      let batch_len = delta.len();

      stats.batches += 1;
      stats.input_records += batch_len;

      let batch = self.transform_batch(family, &delta, &mut stats).await;
      let batch_rows = batch.len();
      stats.rows_committed += batch_rows;

      if dry_run {
        tracing::info!(
          source_family = %family,
          status = "dry_run",
          count = batch_rows,
          watermark = %batch_watermark,
          "dry run: would commit rows and advance watermark"
        );
      } else {
        self
          .store
          .commit_clean_batch(family, batch, batch_watermark)
          .await?;
        tracing::info!(
          source_family = %family,
          status = "committed",
          count = batch_rows,
          watermark = %batch_watermark,
          "committed batch and advanced watermark"
        );
      }

      since = Some(batch_watermark);
      if batch_len < self.batch_limit {
        break;
      }
    }

    stats.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
      source_family = %family,
      status = if dry_run { "dry_run_complete" } else { "cleaned" },
      count = stats.rows_committed,
      duration_ms = stats.duration_ms,
      "cleaning run complete"
    );

    Ok(stats)
  }

  // ── Transform ─────────────────────────────────────────────────────────────

  /// Dispatch every record of one delta batch to its cleaner. Per-record
  /// errors are logged, counted, and treated as skips — the batch goes on.
  async fn transform_batch(
    &self,
    family: SourceFamily,
    records: &[RawRecord],
    stats: &mut FamilyCleanStats,
  ) -> SilverBatch {
    match family {
      SourceFamily::MacroSeries => {
        let mut rows = Vec::new();
        for record in records {
          match record.envelope().and_then(|e| clean_macro(&record.catalog_key, &e)) {
            Ok(out) => {
              stats.skipped += out.skipped;
              rows.extend(out.rows);
            }
            Err(e) => {
              stats.failed += 1;
              warn_record(record, &e);
            }
          }
        }
        SilverBatch::Macro(rows)
      }
      SourceFamily::PriceBars => {
        let mut rows = Vec::new();
        for record in records {
          match record.envelope().and_then(|e| clean_price(&record.catalog_key, &e)) {
            Ok(out) => {
              stats.skipped += out.skipped;
              rows.extend(out.rows);
            }
            Err(e) => {
              stats.failed += 1;
              warn_record(record, &e);
            }
          }
        }
        SilverBatch::Micro(rows)
      }
      SourceFamily::NewsFeed => {
        let mut drafts = Vec::new();
        for record in records {
          match record.envelope().and_then(|e| prepare_news(&record.catalog_key, &e)) {
            Ok(out) => {
              stats.skipped += out.skipped;
              drafts.extend(out.rows);
            }
            Err(e) => {
              stats.failed += 1;
              warn_record(record, &e);
            }
          }
        }
        SilverBatch::News(self.extract_bodies(drafts).await)
      }
    }
  }

  /// Fan body extraction out across the batch's drafts, bounded to
  /// [`EXTRACT_CONCURRENCY`] in flight. All extractions are awaited before
  /// returning so the caller can commit atomically; output order is
  /// irrelevant.
  async fn extract_bodies(&self, drafts: Vec<NewsDraft>) -> Vec<NewsRow> {
    let semaphore = Arc::new(Semaphore::new(EXTRACT_CONCURRENCY));
    let mut tasks = JoinSet::new();

    for draft in drafts {
      let extractor = self.extractor.clone();
      let shutdown = self.shutdown.clone();
      let semaphore = semaphore.clone();

      tasks.spawn(async move {
        let _slot = semaphore.acquire_owned().await.ok();
        let extracted = extractor
          .body(&draft.url, &shutdown)
          .await
          .filter(|body| !body.is_empty());
        if extracted.is_none() {
          tracing::debug!(
            url = %draft.url,
            "no body extracted; falling back to description"
          );
        }
        NewsRow {
          fingerprint:  draft.fingerprint,
          catalog_key:  draft.catalog_key,
          title:        draft.title,
          url:          draft.url,
          published_at: draft.published_at,
          author:       draft.author,
          source_name:  draft.source_name,
          body:         extracted.or(draft.description),
        }
      });
    }

    let mut rows = Vec::new();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(row) => rows.push(row),
        Err(e) => tracing::error!(error = %e, "extraction task panicked"),
      }
    }
    rows
  }

  // ── Administrative operations ─────────────────────────────────────────────

  /// Null out the cleaning watermark so the next run reprocesses all raw
  /// rows of the family (or of every family).
  pub async fn reset_watermark(&self, family: Option<SourceFamily>) -> Result<()> {
    self.store.reset_cleaning_watermark(family).await?;
    match family {
      Some(f) => tracing::info!(source_family = %f, "cleaning watermark reset"),
      None => tracing::info!("all cleaning watermarks reset"),
    }
    Ok(())
  }

  /// The per-family cleaning watermarks, for `--show-watermarks`.
  pub async fn watermarks(&self) -> Result<Vec<Watermark>> {
    Ok(self.store.cleaning_watermarks().await?)
  }

  /// Row counts and watermark alignment per family, for `--verify`.
  pub async fn verify(&self) -> Result<VerifyReport> {
    let mut families = Vec::with_capacity(SourceFamily::ALL.len());

    for family in SourceFamily::ALL {
      let raw_rows = self.store.raw_count(family).await?;
      let silver_rows = self.store.silver_count(family).await?;
      let last_cleaned_at = self
        .store
        .watermark(&cleaning_key(family))
        .await?
        .and_then(|w| w.last_cleaned_at);
      let max_inserted_at = self.store.max_raw_inserted_at(family).await?;
      let aligned = last_cleaned_at == max_inserted_at;

      families.push(FamilyVerify {
        family,
        raw_rows,
        silver_rows,
        last_cleaned_at,
        max_inserted_at,
        aligned,
      });
    }

    Ok(VerifyReport { families })
  }
}

fn warn_record(record: &RawRecord, error: &heimdall_core::Error) {
  tracing::warn!(
    catalog_key = %record.catalog_key,
    source_family = %record.source_family,
    request_hash = %record.request_hash,
    status = "record_failed",
    error = %error,
    "skipping undecodable raw record"
  );
}
