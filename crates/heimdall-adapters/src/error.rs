//! Error type for `heimdall-adapters`.

use heimdall_fetch::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
  /// The catalog entry's configuration blob does not fit the family.
  #[error("invalid source configuration: {0}")]
  InvalidConfig(String),

  /// Upstream succeeded but returned zero items. Not a storage failure; no
  /// raw row is written for macro/price fetches.
  #[error("upstream returned no items")]
  EmptyResultSet,

  /// The shared fetch client gave up (retries exhausted, permanent error,
  /// or cancelled).
  #[error(transparent)]
  Upstream(#[from] FetchError),

  /// The vendor response decoded as JSON but not into the expected shape.
  #[error("unexpected upstream payload: {0}")]
  Decode(String),
}

impl AdapterError {
  /// Stable discriminant for the `error_kind` log field.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::InvalidConfig(_) => "invalid_config",
      Self::EmptyResultSet => "empty_result_set",
      Self::Upstream(e) => e.kind(),
      Self::Decode(_) => "decode_failure",
    }
  }
}

pub type Result<T, E = AdapterError> = std::result::Result<T, E>;
