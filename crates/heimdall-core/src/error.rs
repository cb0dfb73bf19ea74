//! Error types for `heimdall-core`.

use thiserror::Error;

use crate::catalog::SourceFamily;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown source family: {0:?}")]
  UnknownFamily(String),

  #[error("unknown update frequency: {0:?}")]
  UnknownFrequency(String),

  #[error("envelope family mismatch: expected {expected}, got {got}")]
  FamilyMismatch {
    expected: SourceFamily,
    got:      SourceFamily,
  },

  #[error("date parse error: {0}")]
  DateParse(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
