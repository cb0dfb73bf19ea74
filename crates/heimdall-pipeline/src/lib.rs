//! The Heimdall pipeline: ingestion engine, cleaners, differential cleaning
//! driver, and scheduler.
//!
//! Control flow: the scheduler fires `ingest(frequency)` followed by
//! `clean()` for every family that received new Bronze rows. Ingestion fans
//! adapter fetches out across catalog keys; cleaning pulls the Bronze delta
//! per family and commits Silver rows together with the watermark advance.

pub mod clean;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod schedule;

pub use clean::{CleaningPipeline, FamilyCleanStats, VerifyReport};
pub use error::{Error, Result};
pub use extract::{BodyExtractor, HttpExtractor};
pub use ingest::{ActivationReport, IngestReport, IngestionEngine};
pub use schedule::Scheduler;
