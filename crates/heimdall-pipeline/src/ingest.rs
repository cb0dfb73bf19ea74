//! The ingestion engine: selects due catalog entries, invokes adapters,
//! persists Bronze rows idempotently, and advances per-catalog ingestion
//! watermarks. Per-entry failures never abort the batch.

use std::sync::Arc;
use std::time::Instant;

use heimdall_adapters::{AdapterError, EnvelopeSource, FetchContext};
use heimdall_core::catalog::{request_hash, CatalogEntry, SourceFamily, UpdateFrequency};
use heimdall_fetch::Shutdown;
use heimdall_store_sqlite::Store;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::Result;

/// Upper bound on concurrently fetching catalog entries; per-host limits in
/// the fetch client apply underneath this.
const INGEST_CONCURRENCY: usize = 8;

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Aggregate counters for one `ingest(frequency)` run.
#[derive(Debug, Default)]
pub struct IngestReport {
  pub total:       usize,
  /// New Bronze rows written.
  pub ingested:    usize,
  /// Idempotent hash matches — fetch succeeded, row already present.
  pub skipped:     usize,
  /// Upstream succeeded with zero items; nothing written.
  pub empty:       usize,
  pub failed:      usize,
  pub duration_ms: u64,
  /// Families that received at least one new Bronze row; the scheduler
  /// cleans exactly these.
  pub families_with_new_rows: Vec<SourceFamily>,
}

/// Aggregate counters for one activation pass.
#[derive(Debug, Default)]
pub struct ActivationReport {
  pub probed:    usize,
  pub activated: usize,
  pub failed:    usize,
}

#[derive(Debug)]
enum EntryStatus {
  Ingested,
  Skipped,
  Empty,
  Failed,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct IngestionEngine<S> {
  store:    Store,
  adapters: Arc<S>,
  shutdown: Shutdown,
}

impl<S: EnvelopeSource + 'static> IngestionEngine<S> {
  pub fn new(store: Store, adapters: Arc<S>, shutdown: Shutdown) -> Self {
    Self { store, adapters, shutdown }
  }

  /// Ingest every active catalog entry with the given frequency (or the one
  /// entry named by `only`). Entries are fetched concurrently; each one is
  /// isolated — errors are logged and counted, never propagated.
  pub async fn ingest(
    &self,
    frequency: UpdateFrequency,
    only: Option<&str>,
  ) -> Result<IngestReport> {
    let started = Instant::now();

    let entries: Vec<CatalogEntry> = match only {
      Some(key) => self.store.entry(key).await?.into_iter().collect(),
      None => self.store.active_entries(Some(frequency)).await?,
    };

    if let Some(key) = only {
      if entries.is_empty() {
        tracing::warn!(catalog_key = key, "catalog entry not found");
      }
    }

    tracing::info!(
      frequency = %frequency,
      count = entries.len(),
      "starting ingestion batch"
    );

    let semaphore = Arc::new(Semaphore::new(INGEST_CONCURRENCY));
    let mut tasks = JoinSet::new();

    for entry in entries {
      let store = self.store.clone();
      let adapters = self.adapters.clone();
      let shutdown = self.shutdown.clone();
      let semaphore = semaphore.clone();

      tasks.spawn(async move {
        let _slot = semaphore.acquire_owned().await.ok();
        process_entry(store, adapters, shutdown, entry).await
      });
    }

    let mut report = IngestReport::default();
    let mut touched: Vec<SourceFamily> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
      let (family, status) = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
          tracing::error!(error = %e, "ingestion task panicked");
          report.failed += 1;
          report.total += 1;
          continue;
        }
      };

      report.total += 1;
      match status {
        EntryStatus::Ingested => {
          report.ingested += 1;
          if !touched.contains(&family) {
            touched.push(family);
          }
        }
        EntryStatus::Skipped => report.skipped += 1,
        EntryStatus::Empty => report.empty += 1,
        EntryStatus::Failed => report.failed += 1,
      }
    }

    report.families_with_new_rows = touched;
    report.duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
      frequency = %frequency,
      count = report.total,
      ingested = report.ingested,
      skipped = report.skipped,
      empty = report.empty,
      failed = report.failed,
      duration_ms = report.duration_ms,
      "ingestion batch complete"
    );

    Ok(report)
  }

  /// Probe catalog entries with a limit-1 fetch and activate those whose
  /// upstream answers with at least one item. Without `only`, every
  /// inactive entry is probed.
  pub async fn activate(&self, only: Option<&str>) -> Result<ActivationReport> {
    let entries: Vec<CatalogEntry> = match only {
      Some(key) => self.store.entry(key).await?.into_iter().collect(),
      None => self.store.inactive_entries().await?,
    };

    let mut report = ActivationReport::default();

    for entry in entries {
      report.probed += 1;
      let key = entry.catalog_key.clone();
      let started = Instant::now();

      let ctx = FetchContext {
        catalog_key:      key.clone(),
        config:           entry.config.clone(),
        frequency:        entry.update_frequency,
        last_ingested_at: None,
        probe:            true,
      };

      match self
        .adapters
        .fetch(entry.source_family, &ctx, &self.shutdown)
        .await
      {
        Ok(envelope) if !envelope.items.is_empty() => {
          self.store.activate_entry(&key).await?;
          report.activated += 1;
          tracing::info!(
            catalog_key = %key,
            source_family = %entry.source_family,
            status = "activated",
            duration_ms = started.elapsed().as_millis() as u64,
            "catalog entry activated"
          );
        }
        Ok(_) => {
          report.failed += 1;
          tracing::warn!(
            catalog_key = %key,
            source_family = %entry.source_family,
            status = "probe_empty",
            duration_ms = started.elapsed().as_millis() as u64,
            "probe returned no items; entry stays inactive"
          );
        }
        Err(e) => {
          report.failed += 1;
          tracing::warn!(
            catalog_key = %key,
            source_family = %entry.source_family,
            status = "probe_failed",
            error_kind = e.kind(),
            duration_ms = started.elapsed().as_millis() as u64,
            "probe failed; entry stays inactive"
          );
        }
      }
    }

    tracing::info!(
      count = report.probed,
      activated = report.activated,
      failed = report.failed,
      "activation pass complete"
    );

    Ok(report)
  }
}

// ─── Per-entry processing ────────────────────────────────────────────────────

async fn process_entry<S: EnvelopeSource>(
  store: Store,
  adapters: Arc<S>,
  shutdown: Shutdown,
  entry: CatalogEntry,
) -> (SourceFamily, EntryStatus) {
  let key = entry.catalog_key.clone();
  let family = entry.source_family;
  let started = Instant::now();

  let last_ingested_at = match store.watermark(&key).await {
    Ok(wm) => wm.and_then(|w| w.last_ingested_at),
    Err(e) => {
      tracing::error!(
        catalog_key = %key,
        source_family = %family,
        status = "failed",
        error_kind = e.kind(),
        duration_ms = started.elapsed().as_millis() as u64,
        "failed reading watermark"
      );
      return (family, EntryStatus::Failed);
    }
  };

  let ctx = FetchContext {
    catalog_key: key.clone(),
    config: entry.config.clone(),
    frequency: entry.update_frequency,
    last_ingested_at,
    probe: false,
  };

  let envelope = match adapters.fetch(family, &ctx, &shutdown).await {
    Ok(envelope) => envelope,
    Err(AdapterError::EmptyResultSet) => {
      tracing::warn!(
        catalog_key = %key,
        source_family = %family,
        status = "empty",
        error_kind = "empty_result_set",
        duration_ms = started.elapsed().as_millis() as u64,
        "upstream returned no items"
      );
      return (family, EntryStatus::Empty);
    }
    Err(e) => {
      tracing::error!(
        catalog_key = %key,
        source_family = %family,
        status = "failed",
        error_kind = e.kind(),
        duration_ms = started.elapsed().as_millis() as u64,
        "adapter fetch failed"
      );
      return (family, EntryStatus::Failed);
    }
  };

  let hash = request_hash(
    &key,
    &envelope.query_echo,
    entry.update_frequency,
    envelope.fetched_at,
  );

  let payload = match envelope.to_json() {
    Ok(payload) => payload,
    Err(e) => {
      tracing::error!(
        catalog_key = %key,
        source_family = %family,
        status = "failed",
        error_kind = "decode_failure",
        duration_ms = started.elapsed().as_millis() as u64,
        error = %e,
        "failed serialising envelope"
      );
      return (family, EntryStatus::Failed);
    }
  };

  match store.record_fetch(&hash, &key, family, &payload).await {
    Ok(true) => {
      tracing::info!(
        catalog_key = %key,
        source_family = %family,
        status = "ingested",
        request_hash = %hash,
        count = envelope.items.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "stored raw envelope"
      );
      (family, EntryStatus::Ingested)
    }
    Ok(false) => {
      tracing::info!(
        catalog_key = %key,
        source_family = %family,
        status = "skipped",
        request_hash = %hash,
        duration_ms = started.elapsed().as_millis() as u64,
        "already ingested in this window (idempotent skip)"
      );
      (family, EntryStatus::Skipped)
    }
    Err(e) => {
      tracing::error!(
        catalog_key = %key,
        source_family = %family,
        status = "failed",
        error_kind = e.kind(),
        duration_ms = started.elapsed().as_millis() as u64,
        "failed storing raw envelope"
      );
      (family, EntryStatus::Failed)
    }
  }
}
