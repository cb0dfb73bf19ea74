//! Error type for `heimdall-fetch`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
  /// Network failures, timeouts, 5xx and 429 responses. Retried by the
  /// client; surfaced only once the retry budget is exhausted. `status` is
  /// `None` for failures without an HTTP response.
  #[error("transient upstream failure: {reason}")]
  Transient { status: Option<u16>, reason: String },

  /// Non-429 4xx responses and undecodable success bodies. Never retried.
  #[error("permanent upstream failure (HTTP {status}): {reason}")]
  Permanent { status: u16, reason: String },

  /// The shutdown signal fired while the request was in flight or queued.
  #[error("request cancelled by shutdown")]
  Cancelled,
}

impl FetchError {
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Transient { .. })
  }

  /// True once the retry budget was exhausted on an HTTP 429 specifically.
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, Self::Transient { status: Some(429), .. })
  }

  /// Stable discriminant for the `error_kind` log field.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Transient { status: Some(429), .. } => "rate_limited",
      Self::Transient { .. } => "transient_upstream",
      Self::Permanent { .. } => "permanent_upstream",
      Self::Cancelled => "cancelled",
    }
  }
}

pub type Result<T, E = FetchError> = std::result::Result<T, E>;
