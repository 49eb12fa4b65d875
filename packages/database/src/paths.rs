#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the `DuckDB` data directory.
//!
//! The data directory defaults to the project root's `data/` directory and
//! can be moved with the `TICKETSTAT_DATA_DIR` environment variable or the
//! `[storage]` section of the ingest configuration.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TICKETSTAT_DATA_DIR";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`, falling back to the
/// current directory.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the default `data/` directory path.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    project_root().join("data")
}

/// Resolves the data directory: `TICKETSTAT_DATA_DIR` first, then
/// `configured`, then [`default_data_dir`].
#[must_use]
pub fn resolve_data_dir(configured: Option<&Path>) -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| configured.map(Path::to_path_buf))
        .unwrap_or_else(default_data_dir)
}

/// Returns the path of the citation store inside `data_dir`.
#[must_use]
pub fn citations_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("citations.duckdb")
}

/// Returns the path of the geocode cache inside `data_dir`.
#[must_use]
pub fn geocode_cache_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("geocode_cache.duckdb")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
