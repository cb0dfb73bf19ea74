//! Error type for `heimdall-store-sqlite`.
//!
//! Every SQL failure surfaces as [`Error::Storage`]; the enclosing
//! transaction has already been rolled back by the time the caller sees it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] heimdall_core::Error),

  #[error("storage failure: {0}")]
  Storage(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

impl Error {
  /// Stable discriminant for the `error_kind` log field.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Storage(_) => "storage_failure",
      Self::Core(_) | Self::Json(_) | Self::DateParse(_) => "decode_failure",
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
