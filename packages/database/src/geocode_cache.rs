//! Geocoding result cache stored in `DuckDB`.
//!
//! Maps a normalized address to the [`GeoResult`] it resolved to. Every
//! result is stored twice: under the query address and under the resolved
//! address the provider returned, so a later lookup by either string is a
//! hit. Entries are never updated or expired.
//!
//! The whole table is loaded into memory when the cache is opened; lookups
//! never touch the database. Puts write through to `DuckDB` immediately so
//! a crashed run keeps everything it resolved.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use duckdb::Connection;
use ticketstat_citation_models::GeoResult;

use crate::DbError;

struct Inner {
    conn: Connection,
    entries: BTreeMap<String, GeoResult>,
}

/// Persistent address -> [`GeoResult`] cache.
///
/// Safe to share between concurrently processed dates; all access is
/// serialized by one lock.
pub struct GeoCache {
    inner: Mutex<Inner>,
}

impl GeoCache {
    /// Opens (or creates) the cache file at `path` and loads every entry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection, schema creation, or load fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let cache = Self::from_connection(Connection::open(path)?)?;
        log::info!(
            "Loaded {} geocode cache entries from {}",
            cache.len(),
            path.display()
        );
        Ok(cache)
    }

    /// Opens an empty, non-persistent cache.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        let entries = read_entries(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner { conn, entries }),
        })
    }

    /// Re-reads every persisted entry into memory, returning the count.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn load(&self) -> Result<usize, DbError> {
        let mut inner = self.lock();
        let entries = read_entries(&inner.conn)?;
        inner.entries = entries;
        Ok(inner.entries.len())
    }

    /// Returns the cached result for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<GeoResult> {
        self.lock().entries.get(key).cloned()
    }

    /// Whether `key` has a cached result.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Caches `result` under `key` and under its resolved address.
    ///
    /// Keys that are already cached keep their existing result.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails. The in-memory entries are
    /// only updated once the write succeeded.
    pub fn put(&self, key: &str, result: &GeoResult) -> Result<(), DbError> {
        let mut inner = self.lock();

        let mut keys = vec![key];
        let resolved = result.resolved_address.as_str();
        if !resolved.is_empty() && resolved != key {
            keys.push(resolved);
        }
        keys.retain(|k| !inner.entries.contains_key(*k));

        if keys.is_empty() {
            return Ok(());
        }

        let mut stmt = inner.conn.prepare(
            "INSERT INTO geocode_cache (
                address_key, provider, lat, lng, resolved_address,
                street_number, street_name, city, state, zip, census_tract
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (address_key) DO NOTHING",
        )?;

        for k in &keys {
            stmt.execute(duckdb::params![
                *k,
                result.provider,
                result.latitude,
                result.longitude,
                result.resolved_address,
                result.street_number,
                result.street_name,
                result.city,
                result.state,
                result.zip,
                result.census_tract,
            ])?;
        }
        drop(stmt);

        for k in keys {
            inner.entries.insert(k.to_string(), result.clone());
        }

        Ok(())
    }

    /// Flushes the cache file to disk.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the checkpoint fails.
    pub fn save(&self) -> Result<(), DbError> {
        self.lock().conn.execute_batch("CHECKPOINT;")?;
        Ok(())
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of cached keys per provider.
    #[must_use]
    pub fn provider_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.lock();
        let mut counts = BTreeMap::new();
        for result in inner.entries.values() {
            *counts.entry(result.provider.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS geocode_cache (
            address_key TEXT NOT NULL PRIMARY KEY,
            provider TEXT NOT NULL,
            lat DOUBLE,
            lng DOUBLE,
            resolved_address TEXT NOT NULL,
            street_number TEXT,
            street_name TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            census_tract TEXT,
            created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok(())
}

fn read_entries(conn: &Connection) -> Result<BTreeMap<String, GeoResult>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT address_key, provider, lat, lng, resolved_address,
                street_number, street_name, city, state, zip, census_tract
         FROM geocode_cache",
    )?;

    let mut entries = BTreeMap::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let result = GeoResult {
            provider: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            resolved_address: row.get(4)?,
            street_number: row.get(5)?,
            street_name: row.get(6)?,
            city: row.get(7)?,
            state: row.get(8)?,
            zip: row.get(9)?,
            census_tract: row.get(10)?,
        };
        entries.insert(key, result);
    }

    Ok(entries)
}
