//! heimdall binary.
//!
//! Reads `heimdall.toml` (or the path given with `--config`), layers
//! `HEIMDALL_`-prefixed environment variables on top (a `.env` file is
//! loaded first), opens the SQLite store, and runs one of the pipeline
//! commands. Batch commands exit 0 even when individual records fail; only
//! fatal setup errors (unreadable config, unopenable store) exit non-zero.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use heimdall_adapters::{AdapterSet, AdapterSettings};
use heimdall_core::catalog::{SourceFamily, UpdateFrequency};
use heimdall_fetch::{FetchClient, HostLimits, Shutdown, ShutdownHandle};
use heimdall_pipeline::{
  CleaningPipeline, HttpExtractor, IngestionEngine, Scheduler, VerifyReport,
};
use heimdall_store_sqlite::Store;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Heimdall market-intelligence ingestion pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "heimdall.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Poll due upstream sources and persist raw envelopes (Bronze).
  Ingest {
    #[arg(long, value_enum, ignore_case = true)]
    frequency: FrequencyArg,
    /// Restrict the run to a single catalog key.
    #[arg(long)]
    catalog:   Option<String>,
  },
  /// Transform new Bronze rows into the Silver tables.
  Clean {
    /// Restrict to one source family.
    #[arg(long, value_enum, ignore_case = true)]
    source:          Option<SourceArg>,
    /// Transform and log, but commit nothing.
    #[arg(long)]
    dry_run:         bool,
    /// Override the per-batch row cap.
    #[arg(long)]
    limit:           Option<usize>,
    /// Reset the cleaning watermark for a family (or ALL), then exit.
    #[arg(long, value_name = "MACRO|MICRO|NEWS|ALL")]
    reset_watermark: Option<String>,
    /// Display the cleaning watermarks, then exit.
    #[arg(long)]
    show_watermarks: bool,
    /// Check Silver counts and watermark alignment after cleaning.
    #[arg(long)]
    verify:          bool,
  },
  /// Run the long-lived scheduler until SIGTERM/SIGINT.
  Schedule,
  /// Probe catalog entries and activate the ones that answer with data.
  Activate {
    /// Probe a single catalog key instead of all inactive entries.
    #[arg(long)]
    catalog: Option<String>,
  },
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
enum FrequencyArg {
  Hourly,
  Daily,
  Monthly,
  Quarterly,
}

impl From<FrequencyArg> for UpdateFrequency {
  fn from(f: FrequencyArg) -> Self {
    match f {
      FrequencyArg::Hourly => Self::Hourly,
      FrequencyArg::Daily => Self::Daily,
      FrequencyArg::Monthly => Self::Monthly,
      FrequencyArg::Quarterly => Self::Quarterly,
    }
  }
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
enum SourceArg {
  Macro,
  Micro,
  News,
  All,
}

impl SourceArg {
  fn families(self) -> Vec<SourceFamily> {
    match self {
      Self::Macro => vec![SourceFamily::MacroSeries],
      Self::Micro => vec![SourceFamily::PriceBars],
      Self::News => vec![SourceFamily::NewsFeed],
      Self::All => SourceFamily::ALL.to_vec(),
    }
  }
}

// ─── Settings ────────────────────────────────────────────────────────────────

fn default_db_path() -> PathBuf {
  PathBuf::from("data/heimdall.db")
}

#[derive(Debug, Deserialize)]
struct Settings {
  #[serde(default = "default_db_path")]
  db_path:  PathBuf,
  #[serde(default)]
  fetch:    FetchSettings,
  adapters: AdapterSettings,
}

/// Defaults for the shared transport's per-host limits.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct FetchSettings {
  max_concurrency: usize,
  rate_per_sec:    f64,
  burst:           f64,
}

impl Default for FetchSettings {
  fn default() -> Self {
    let limits = HostLimits::default();
    Self {
      max_concurrency: limits.max_concurrency,
      rate_per_sec:    limits.rate_per_sec,
      burst:           limits.burst,
    }
  }
}

impl FetchSettings {
  fn limits(&self) -> HostLimits {
    HostLimits {
      max_concurrency: self.max_concurrency,
      rate_per_sec:    self.rate_per_sec,
      burst:           self.burst,
    }
  }
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Load `.env` before the config builder so adapter credentials exported
  // there are visible as HEIMDALL_* variables.
  dotenvy::dotenv().ok();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("HEIMDALL").separator("__"))
    .build()
    .context("failed to read configuration")?;

  let settings: Settings = settings
    .try_deserialize()
    .context("failed to deserialise settings (are the adapter API keys set?)")?;

  if let Some(dir) = settings.db_path.parent() {
    if !dir.as_os_str().is_empty() {
      std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory {dir:?}"))?;
    }
  }

  let store = Store::open(&settings.db_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.db_path))?;

  let client = FetchClient::new(settings.fetch.limits())
    .context("failed to build fetch client")?;
  let adapters = Arc::new(AdapterSet::new(client.clone(), settings.adapters));

  let (handle, shutdown) = Shutdown::new();
  spawn_signal_listener(handle);

  let engine = IngestionEngine::new(store.clone(), adapters, shutdown.clone());
  let extractor = Arc::new(HttpExtractor::new(client));
  let pipeline = CleaningPipeline::new(store, extractor, shutdown.clone());

  match cli.command {
    Command::Ingest { frequency, catalog } => {
      engine.ingest(frequency.into(), catalog.as_deref()).await?;
    }

    Command::Clean {
      source,
      dry_run,
      limit,
      reset_watermark,
      show_watermarks,
      verify,
    } => {
      let pipeline = match limit {
        Some(limit) => pipeline.with_batch_limit(limit),
        None => pipeline,
      };

      if let Some(target) = reset_watermark {
        pipeline.reset_watermark(parse_reset_target(&target)?).await?;
        print_watermarks(&pipeline).await?;
        return Ok(());
      }

      if show_watermarks {
        print_watermarks(&pipeline).await?;
        return Ok(());
      }

      let families = source.unwrap_or(SourceArg::All).families();
      pipeline.clean_all(&families, dry_run).await;

      if verify {
        print_verify(&pipeline.verify().await?);
      }
      print_watermarks(&pipeline).await?;
    }

    Command::Schedule => {
      let scheduler = Scheduler::new(engine, pipeline, shutdown);
      scheduler.run().await?;
    }

    Command::Activate { catalog } => {
      engine.activate(catalog.as_deref()).await?;
    }
  }

  Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn parse_reset_target(raw: &str) -> anyhow::Result<Option<SourceFamily>> {
  match raw.to_uppercase().as_str() {
    "MACRO" => Ok(Some(SourceFamily::MacroSeries)),
    "MICRO" => Ok(Some(SourceFamily::PriceBars)),
    "NEWS" => Ok(Some(SourceFamily::NewsFeed)),
    "ALL" => Ok(None),
    other => anyhow::bail!("unknown reset target {other:?}; expected MACRO, MICRO, NEWS, or ALL"),
  }
}

async fn print_watermarks(pipeline: &CleaningPipeline) -> anyhow::Result<()> {
  println!("cleaning watermarks:");
  for wm in pipeline.watermarks().await? {
    let status = wm
      .last_cleaned_at
      .map(|ts| ts.to_rfc3339())
      .unwrap_or_else(|| "never cleaned".to_owned());
    println!("  {:32} {status}", wm.catalog_key);
  }
  Ok(())
}

fn print_verify(report: &VerifyReport) {
  println!("verification:");
  for family in &report.families {
    let aligned = if family.aligned { "aligned" } else { "MISALIGNED" };
    println!(
      "  {:14} bronze={:<6} silver={:<6} watermark {aligned}",
      family.family.to_string(),
      family.raw_rows,
      family.silver_rows,
    );
  }
}

/// Trigger the shared shutdown signal on SIGINT or SIGTERM.
fn spawn_signal_listener(handle: ShutdownHandle) {
  tokio::spawn(async move {
    wait_for_signal().await;
    tracing::info!("shutdown signal received");
    handle.trigger();
  });
}

async fn wait_for_signal() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
      Ok(mut term) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => {}
          _ = term.recv() => {}
        }
      }
      Err(_) => {
        tokio::signal::ctrl_c().await.ok();
      }
    }
  }
  #[cfg(not(unix))]
  {
    tokio::signal::ctrl_c().await.ok();
  }
}
