//! Macro-series adapter — economic time series from a FRED-style API.

use chrono::Utc;
use heimdall_core::envelope::{EnvelopeItems, RawEnvelope, RawObservation};
use heimdall_fetch::{FetchClient, FetchRequest, Shutdown};
use serde::Deserialize;
use url::Url;

use crate::settings::MacroSourceSettings;
use crate::{AdapterError, FetchContext, Result};

// ─── Config ──────────────────────────────────────────────────────────────────

/// Per-catalog configuration: one series identifier or several.
#[derive(Debug, Deserialize)]
struct MacroConfig {
  series: SeriesSpec,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeriesSpec {
  One(String),
  Many(Vec<String>),
}

impl SeriesSpec {
  fn ids(&self) -> Vec<String> {
    match self {
      Self::One(id) => vec![id.trim().to_owned()],
      Self::Many(ids) => {
        ids.iter().map(|s| s.trim().to_owned()).collect()
      }
    }
  }
}

// ─── Vendor response ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SeriesResponse {
  observations: Vec<VendorObservation>,
}

#[derive(Debug, Deserialize)]
struct VendorObservation {
  date:  String,
  value: String,
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

pub struct MacroSeriesAdapter {
  client:   FetchClient,
  settings: MacroSourceSettings,
}

impl MacroSeriesAdapter {
  pub fn new(client: FetchClient, settings: MacroSourceSettings) -> Self {
    Self { client, settings }
  }

  /// Fetch observations for every configured series and merge them into one
  /// envelope. Sentinel non-numeric values (e.g. `"."`) pass through — the
  /// cleaner filters, not the adapter.
  pub async fn fetch(
    &self,
    ctx: &FetchContext,
    shutdown: &Shutdown,
  ) -> Result<RawEnvelope> {
    let config: MacroConfig = serde_json::from_value(ctx.config.clone())
      .map_err(|e| AdapterError::InvalidConfig(format!("{}: {e}", ctx.catalog_key)))?;

    let series_ids = config.series.ids();
    if series_ids.is_empty() || series_ids.iter().any(|s| s.is_empty()) {
      return Err(AdapterError::InvalidConfig(format!(
        "{}: empty series list",
        ctx.catalog_key
      )));
    }

    let observation_start =
      ctx.incremental_start().map(|d| d.format("%Y-%m-%d").to_string());

    let mut observations = Vec::new();
    for series_id in &series_ids {
      let response = self
        .fetch_series(series_id, observation_start.as_deref(), ctx.probe, shutdown)
        .await?;
      observations.extend(
        response
          .observations
          .into_iter()
          .map(|o| RawObservation { date: o.date, value: o.value }),
      );
    }

    if observations.is_empty() {
      return Err(AdapterError::EmptyResultSet);
    }

    let mut query_echo = serde_json::json!({ "series": series_ids });
    if let Some(start) = &observation_start {
      query_echo["observation_start"] = serde_json::json!(start);
    }

    Ok(RawEnvelope {
      fetched_at: Utc::now(),
      query_echo,
      items: EnvelopeItems::MacroSeries { observations },
    })
  }

  async fn fetch_series(
    &self,
    series_id: &str,
    observation_start: Option<&str>,
    probe: bool,
    shutdown: &Shutdown,
  ) -> Result<SeriesResponse> {
    let url = Url::parse(&format!(
      "{}/series/observations",
      self.settings.base_url.trim_end_matches('/')
    ))
    .map_err(|e| AdapterError::InvalidConfig(format!("bad base_url: {e}")))?;

    let mut request = FetchRequest::new(url)
      .query("series_id", series_id)
      .query("api_key", self.settings.api_key.clone())
      .query("file_type", "json")
      .timeout(self.settings.timeout());

    if let Some(start) = observation_start {
      request = request.query("observation_start", start);
    }
    if probe {
      request = request.query("limit", "1").query("sort_order", "desc");
    }

    let body = self.client.get_json(&request, shutdown).await?;
    serde_json::from_value(body).map_err(|e| {
      AdapterError::Decode(format!("series {series_id}: {e}"))
    })
  }
}
