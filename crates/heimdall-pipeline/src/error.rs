//! Error type for `heimdall-pipeline`.
//!
//! Per-record and per-catalog failures are handled (logged and counted)
//! inside the pipeline; what escapes here is only what should abort a whole
//! command — store access failing at the batch level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[from] heimdall_store_sqlite::Error),

  #[error("core error: {0}")]
  Core(#[from] heimdall_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
