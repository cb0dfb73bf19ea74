//! Price-bars adapter — daily OHLCV history from a chart-style API.

use chrono::{DateTime, Utc};
use heimdall_core::envelope::{EnvelopeItems, RawBar, RawEnvelope};
use heimdall_fetch::{FetchClient, FetchRequest, Shutdown};
use serde::Deserialize;
use url::Url;

use crate::settings::PriceSourceSettings;
use crate::{AdapterError, FetchContext, Result};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PriceConfig {
  ticker: String,
}

// ─── Vendor response ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
  chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
  result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
  #[serde(default)]
  timestamp:  Vec<i64>,
  indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
  quote: Vec<QuoteColumns>,
}

/// Column-oriented OHLCV; individual cells may be null upstream.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteColumns {
  open:   Vec<Option<f64>>,
  high:   Vec<Option<f64>>,
  low:    Vec<Option<f64>>,
  close:  Vec<Option<f64>>,
  volume: Vec<Option<i64>>,
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

pub struct PriceBarsAdapter {
  client:   FetchClient,
  settings: PriceSourceSettings,
}

impl PriceBarsAdapter {
  pub fn new(client: FetchClient, settings: PriceSourceSettings) -> Self {
    Self { client, settings }
  }

  /// Fetch daily bars for the configured ticker. Dates are normalized to
  /// UTC midnight; bars with missing columns survive here and are dropped
  /// by the cleaner.
  pub async fn fetch(
    &self,
    ctx: &FetchContext,
    shutdown: &Shutdown,
  ) -> Result<RawEnvelope> {
    let config: PriceConfig = serde_json::from_value(ctx.config.clone())
      .map_err(|e| AdapterError::InvalidConfig(format!("{}: {e}", ctx.catalog_key)))?;

    let ticker = config.ticker.trim().to_owned();
    if ticker.is_empty() {
      return Err(AdapterError::InvalidConfig(format!(
        "{}: empty ticker",
        ctx.catalog_key
      )));
    }

    let url = Url::parse(&format!(
      "{}/{ticker}",
      self.settings.base_url.trim_end_matches('/')
    ))
    .map_err(|e| AdapterError::InvalidConfig(format!("bad base_url: {e}")))?;

    let mut request = FetchRequest::new(url)
      .query("interval", "1d")
      .timeout(self.settings.timeout());

    // Probe: a five-day window. Incremental: look-back from the watermark.
    // First run: full history.
    let window_echo = if ctx.probe {
      request = request.query("range", "5d");
      serde_json::json!("5d")
    } else if let Some(start) = ctx.incremental_start() {
      let period1 = start
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc().timestamp())
        .unwrap_or(0);
      request = request
        .query("period1", period1.to_string())
        .query("period2", Utc::now().timestamp().to_string());
      serde_json::json!(start.format("%Y-%m-%d").to_string())
    } else {
      request = request.query("range", "max");
      serde_json::json!("max")
    };

    let body = self.client.get_json(&request, shutdown).await?;
    let response: ChartResponse = serde_json::from_value(body)
      .map_err(|e| AdapterError::Decode(format!("ticker {ticker}: {e}")))?;

    let bars = into_bars(response);
    if bars.is_empty() {
      return Err(AdapterError::EmptyResultSet);
    }

    Ok(RawEnvelope {
      fetched_at: Utc::now(),
      query_echo: serde_json::json!({ "ticker": ticker, "window": window_echo }),
      items:      EnvelopeItems::PriceBars { bars },
    })
  }
}

fn into_bars(response: ChartResponse) -> Vec<RawBar> {
  let Some(result) = response
    .chart
    .result
    .and_then(|mut r| (!r.is_empty()).then(|| r.remove(0)))
  else {
    return Vec::new();
  };

  let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
  let column = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

  let mut bars = Vec::with_capacity(result.timestamp.len());
  for (i, ts) in result.timestamp.iter().enumerate() {
    let Some(moment) = DateTime::from_timestamp(*ts, 0) else {
      continue;
    };
    // Bars are daily; pin the exchange timestamp to UTC midnight.
    let date = moment
      .date_naive()
      .and_hms_opt(0, 0, 0)
      .map(|naive| naive.and_utc())
      .unwrap_or(moment);

    bars.push(RawBar {
      date,
      open: column(&quote.open, i),
      high: column(&quote.high, i),
      low: column(&quote.low, i),
      close: column(&quote.close, i),
      volume: quote.volume.get(i).copied().flatten(),
    });
  }
  bars
}
