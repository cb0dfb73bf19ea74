//! Core types for the Heimdall market-intelligence ingestion pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod catalog;
pub mod clean;
pub mod envelope;
pub mod error;
pub mod silver;
pub mod watermark;

pub use error::{Error, Result};
