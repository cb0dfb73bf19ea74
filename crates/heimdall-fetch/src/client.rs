//! The retrying fetch client.
//!
//! Cheap to clone — the inner [`reqwest::Client`] and the per-host gate are
//! reference-counted, so every adapter shares one pool of connections and
//! one set of rate-limit state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use url::Url;

use crate::error::{FetchError, Result};
use crate::limit::{HostLimits, RateGate};
use crate::shutdown::Shutdown;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_AFTER_CEILING: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Request ─────────────────────────────────────────────────────────────────

/// One GET request. Adapters own the URL and query shape; the client owns
/// everything about delivery.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub url:     Url,
  pub query:   Vec<(String, String)>,
  /// Connect + read timeout per attempt; also bounds admission waits.
  pub timeout: Duration,
}

impl FetchRequest {
  pub fn new(url: Url) -> Self {
    Self { url, query: Vec::new(), timeout: DEFAULT_TIMEOUT }
  }

  pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
    self.query.push((key.to_owned(), value.into()));
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

// ─── Client ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FetchClient {
  http: reqwest::Client,
  gate: Arc<RateGate>,
}

impl FetchClient {
  pub fn new(defaults: HostLimits) -> Result<Self> {
    Self::with_host_overrides(defaults, HashMap::new())
  }

  /// Per-host limits fixed at construction; hosts not listed use `defaults`.
  pub fn with_host_overrides(
    defaults: HostLimits,
    overrides: HashMap<String, HostLimits>,
  ) -> Result<Self> {
    let http = reqwest::Client::builder()
      .connect_timeout(DEFAULT_TIMEOUT)
      .build()
      .map_err(|e| FetchError::Transient {
        status: None,
        reason: format!("failed to build HTTP client: {e}"),
      })?;

    Ok(Self { http, gate: Arc::new(RateGate::new(defaults, overrides)) })
  }

  /// Fetch a JSON document, retrying transient failures up to three attempts
  /// with 1s/2s/4s (±25%) backoff. Every suspension point — admission,
  /// in-flight request, backoff sleep — races the shutdown signal.
  pub async fn get_json(
    &self,
    request: &FetchRequest,
    shutdown: &Shutdown,
  ) -> Result<serde_json::Value> {
    let response = self.get_response(request, shutdown, MAX_ATTEMPTS).await?;
    let status = response.status().as_u16();
    response.json().await.map_err(|e| FetchError::Permanent {
      status,
      reason: format!("undecodable response body: {e}"),
    })
  }

  /// Fetch a text body (HTML, for the news full-text extractor) with the
  /// same backoff and cancellation behavior as [`Self::get_json`], under a
  /// caller-chosen attempt budget (clamped to at least one). The body
  /// extractor allows itself a single retry rather than the full adapter
  /// schedule.
  pub async fn get_text(
    &self,
    request: &FetchRequest,
    shutdown: &Shutdown,
    max_attempts: u32,
  ) -> Result<String> {
    let response = self
      .get_response(request, shutdown, max_attempts.max(1))
      .await?;
    response.text().await.map_err(|e| FetchError::Transient {
      status: None,
      reason: format!("failed reading response body: {e}"),
    })
  }

  async fn get_response(
    &self,
    request: &FetchRequest,
    shutdown: &Shutdown,
    max_attempts: u32,
  ) -> Result<reqwest::Response> {
    let host = request.url.host_str().unwrap_or("-").to_owned();
    let mut attempt = 0;

    loop {
      attempt += 1;

      let permit = tokio::select! {
        _ = shutdown.triggered() => return Err(FetchError::Cancelled),
        admitted = tokio::time::timeout(request.timeout, self.gate.admit(&host)) => {
          match admitted {
            Ok(permit) => permit?,
            Err(_) => {
              return Err(FetchError::Transient {
                status: None,
                reason: format!("admission to {host} timed out"),
              })
            }
          }
        }
      };

      let outcome = tokio::select! {
        _ = shutdown.triggered() => return Err(FetchError::Cancelled),
        outcome = self.attempt(request) => outcome,
      };
      // Release the host slot before any backoff sleep.
      drop(permit);

      let (error, retry_after) = match outcome {
        Ok(response) => return Ok(response),
        Err(Attempt { error, retry_after }) => (error, retry_after),
      };

      if !error.is_transient() || attempt >= max_attempts {
        return Err(error);
      }

      let delay = retry_after
        .map(|d| d.min(RETRY_AFTER_CEILING))
        .unwrap_or_else(|| backoff_delay(attempt));
      tracing::debug!(
        host = %host,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "retrying after transient failure"
      );

      tokio::select! {
        _ = shutdown.triggered() => return Err(FetchError::Cancelled),
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }

  async fn attempt(&self, request: &FetchRequest) -> Result<reqwest::Response, Attempt> {
    let response = self
      .http
      .get(request.url.clone())
      .query(&request.query)
      .timeout(request.timeout)
      .send()
      .await
      .map_err(|e| Attempt {
        error:       FetchError::Transient { status: None, reason: e.to_string() },
        retry_after: None,
      })?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let retry_after = retry_after_hint(&response);
    let error = classify_status(status.as_u16());
    Err(Attempt { error, retry_after })
  }
}

struct Attempt {
  error:       FetchError,
  retry_after: Option<Duration>,
}

// ─── Classification and backoff ──────────────────────────────────────────────

fn classify_status(status: u16) -> FetchError {
  match status {
    429 => FetchError::Transient {
      status: Some(429),
      reason: "HTTP 429 rate limited".to_owned(),
    },
    500..=599 => FetchError::Transient {
      status: Some(status),
      reason: format!("HTTP {status} server error"),
    },
    _ => FetchError::Permanent {
      status,
      reason: "client error".to_owned(),
    },
  }
}

fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
  response
    .headers()
    .get(reqwest::header::RETRY_AFTER)?
    .to_str()
    .ok()?
    .parse::<u64>()
    .ok()
    .map(Duration::from_secs)
}

/// 1s, 2s, 4s doubling with ±25% jitter.
fn backoff_delay(attempt: u32) -> Duration {
  let base = Duration::from_secs(1 << (attempt - 1).min(4));
  let factor = rand::thread_rng().gen_range(0.75..=1.25);
  base.mul_f64(factor)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_classification() {
    assert!(classify_status(429).is_transient());
    assert!(classify_status(429).is_rate_limited());
    assert!(!classify_status(500).is_rate_limited());
    assert!(classify_status(500).is_transient());
    assert!(classify_status(503).is_transient());
    assert!(!classify_status(400).is_transient());
    assert!(!classify_status(404).is_transient());
    assert!(matches!(
      classify_status(403),
      FetchError::Permanent { status: 403, .. }
    ));
  }

  #[test]
  fn backoff_schedule_shape() {
    for attempt in 1..=3u32 {
      let expected = Duration::from_secs(1 << (attempt - 1));
      for _ in 0..32 {
        let delay = backoff_delay(attempt);
        assert!(delay >= expected.mul_f64(0.75));
        assert!(delay <= expected.mul_f64(1.25));
      }
    }
  }

  #[test]
  fn request_builder_accumulates_query() {
    let request = FetchRequest::new(Url::parse("https://api.example.com/v1").unwrap())
      .query("series_id", "DGS10")
      .query("file_type", "json")
      .timeout(Duration::from_secs(5));

    assert_eq!(request.query.len(), 2);
    assert_eq!(request.timeout, Duration::from_secs(5));
  }
}
