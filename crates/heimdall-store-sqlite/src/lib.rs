//! SQLite persistence gateway for the Heimdall pipeline.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The gateway holds the single writer
//! connection for the life of the process; analytical consumers open their
//! own read-only handles (WAL makes that safe).

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{SilverBatch, Store};

#[cfg(test)]
mod tests;
