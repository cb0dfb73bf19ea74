//! Source adapters — one per upstream family.
//!
//! An adapter turns a catalog entry's private configuration into exactly one
//! canonical [`RawEnvelope`] per invocation, or fails. Adapters never write
//! to the store, never retry beyond what the fetch client offers, and never
//! extract article bodies (a cleaner concern).

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

mod macro_series;
mod news_feed;
mod price_bars;
mod settings;

pub mod error;

use std::future::Future;

use chrono::{DateTime, Utc};
use heimdall_core::catalog::{SourceFamily, UpdateFrequency};
use heimdall_core::envelope::RawEnvelope;
use heimdall_fetch::{FetchClient, Shutdown};

pub use error::{AdapterError, Result};
pub use macro_series::MacroSeriesAdapter;
pub use news_feed::NewsFeedAdapter;
pub use price_bars::PriceBarsAdapter;
pub use settings::{
  AdapterSettings, MacroSourceSettings, NewsSourceSettings,
  PriceSourceSettings,
};

// ─── Context ─────────────────────────────────────────────────────────────────

/// Everything an adapter may consult when building its request.
#[derive(Debug, Clone)]
pub struct FetchContext {
  pub catalog_key:      String,
  /// The catalog entry's opaque configuration blob, interpreted per family.
  pub config:           serde_json::Value,
  pub frequency:        UpdateFrequency,
  /// Drives the incremental fetch window; `None` means full history.
  pub last_ingested_at: Option<DateTime<Utc>>,
  /// Activation probe: fetch a limit-1 window instead of real data.
  pub probe:            bool,
}

impl FetchContext {
  /// Start date for an incremental fetch, with a frequency-sized look-back
  /// to absorb upstream revisions. `None` on first run (full history).
  pub fn incremental_start(&self) -> Option<chrono::NaiveDate> {
    let last = self.last_ingested_at?;
    Some((last - chrono::Duration::days(self.frequency.lookback_days())).date_naive())
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over one upstream family's fetch path. The set of
/// implementations is closed; registering a new family is a source change.
///
/// All methods return `Send` futures so fetches can be fanned out across
/// catalog keys on a multi-threaded runtime.
pub trait EnvelopeSource: Send + Sync {
  fn fetch<'a>(
    &'a self,
    family: SourceFamily,
    ctx: &'a FetchContext,
    shutdown: &'a Shutdown,
  ) -> impl Future<Output = Result<RawEnvelope>> + Send + 'a;
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// The closed set of adapters, dispatched by source family. All three share
/// one [`FetchClient`] and therefore one pool of per-host limit state.
pub struct AdapterSet {
  macro_series: MacroSeriesAdapter,
  price_bars:   PriceBarsAdapter,
  news_feed:    NewsFeedAdapter,
}

impl AdapterSet {
  pub fn new(client: FetchClient, settings: AdapterSettings) -> Self {
    Self {
      macro_series: MacroSeriesAdapter::new(client.clone(), settings.macro_series),
      price_bars:   PriceBarsAdapter::new(client.clone(), settings.price_bars),
      news_feed:    NewsFeedAdapter::new(client, settings.news_feed),
    }
  }
}

impl EnvelopeSource for AdapterSet {
  async fn fetch(
    &self,
    family: SourceFamily,
    ctx: &FetchContext,
    shutdown: &Shutdown,
  ) -> Result<RawEnvelope> {
    match family {
      SourceFamily::MacroSeries => self.macro_series.fetch(ctx, shutdown).await,
      SourceFamily::PriceBars => self.price_bars.fetch(ctx, shutdown).await,
      SourceFamily::NewsFeed => self.news_feed.fetch(ctx, shutdown).await,
    }
  }
}
