//! SQL schema for the Heimdall SQLite store.
//!
//! Executed idempotently at connection startup. Future migrations will be
//! gated on `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS data_catalog (
    catalog_key      TEXT PRIMARY KEY,
    source_family    TEXT NOT NULL,   -- 'MACRO_SERIES' | 'PRICE_BARS' | 'NEWS_FEED'
    update_frequency TEXT NOT NULL,   -- 'HOURLY' | 'DAILY' | 'MONTHLY' | 'QUARTERLY'
    config_params    TEXT NOT NULL DEFAULT '{}',
    role             TEXT,            -- judgment/validation tag; pass-through
    scope            TEXT,            -- macro/micro tag; pass-through
    entity_name      TEXT,
    is_active        INTEGER NOT NULL DEFAULT 0
);

-- Bronze tier. One row per successful adapter fetch; never mutated.
-- May hold upstream error payloads (e.g. a rate-limited news fetch).
CREATE TABLE IF NOT EXISTS raw_ingestion_cache (
    request_hash  TEXT PRIMARY KEY,   -- hash over key + params + time window
    catalog_key   TEXT NOT NULL,
    source_family TEXT NOT NULL,
    raw_payload   TEXT NOT NULL,      -- canonical envelope JSON, verbatim
    inserted_at   TEXT NOT NULL       -- RFC 3339 UTC, fixed microsecond width
);

-- Per-stream, per-stage checkpoints. Synthetic 'SYSTEM_CLEANING_<FAMILY>'
-- rows carry the per-family cleaning watermark.
CREATE TABLE IF NOT EXISTS sync_watermarks (
    catalog_key      TEXT PRIMARY KEY,
    last_ingested_at TEXT,
    last_cleaned_at  TEXT
);

CREATE TABLE IF NOT EXISTS timeseries_macro (
    catalog_key TEXT NOT NULL,
    date        TEXT NOT NULL,
    value       REAL NOT NULL,
    UNIQUE (catalog_key, date)
);

CREATE TABLE IF NOT EXISTS timeseries_micro (
    catalog_key TEXT NOT NULL,
    date        TEXT NOT NULL,
    val_open    REAL NOT NULL,
    val_high    REAL NOT NULL,
    val_low     REAL NOT NULL,
    val_close   REAL NOT NULL,
    val_volume  INTEGER,
    UNIQUE (catalog_key, date)
);

CREATE TABLE IF NOT EXISTS news_intel_pool (
    fingerprint     TEXT PRIMARY KEY, -- md5 of the canonicalized URL
    catalog_key     TEXT NOT NULL,
    title           TEXT NOT NULL,
    url             TEXT NOT NULL,
    published_at    TEXT,
    author          TEXT,
    source_name     TEXT,
    body            TEXT,             -- full article text; NULL when extraction failed
    sentiment_score REAL,             -- owned by downstream consumers
    ai_summary      TEXT              -- owned by downstream consumers
);

CREATE INDEX IF NOT EXISTS raw_family_inserted_idx
    ON raw_ingestion_cache(source_family, inserted_at);
CREATE INDEX IF NOT EXISTS catalog_active_freq_idx
    ON data_catalog(is_active, update_frequency);

PRAGMA user_version = 1;
";
