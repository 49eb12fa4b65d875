#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` persistence for the ticketstat pipeline.
//!
//! Two files live in the data directory (see [`paths`]):
//!
//! - `citations.duckdb`: the `ticketstat` table of enriched citations,
//!   written by [`citation_db::CitationStore`].
//! - `geocode_cache.duckdb`: the append-only address cache behind
//!   [`geocode_cache::GeoCache`].
//!
//! `duckdb::Connection` is `Send` but not `Sync`, so both wrap their
//! connection in a `Mutex`.

pub mod citation_db;
pub mod geocode_cache;
pub mod paths;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (e.g. creating the data directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
