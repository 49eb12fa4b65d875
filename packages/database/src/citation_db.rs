//! Citation store in `DuckDB`.
//!
//! One `ticketstat` table keyed by `(ticket_no, violation_code)`. Writes
//! are upserts: a key that already exists has every other column replaced,
//! so re-ingesting a date never creates duplicates and picks up status
//! changes made on the portal since the last run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use duckdb::Connection;
use ticketstat_citation_models::{CitationKey, EnrichedCitationRow};

use crate::DbError;

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 1_000;

/// Columns bound per row.
const COLUMNS_PER_ROW: usize = 25;

/// The subset of a stored citation read back by [`CitationStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCitation {
    pub ticket_no: String,
    pub violation_code: String,
    pub status: Option<String>,
    pub plate: Option<String>,
    pub fine: Option<f64>,
    /// `YYYY-MM-DD HH:MM:SS`, or `None` if the portal timestamp was unparsable.
    pub infraction_datetime: Option<String>,
    pub street_address: Option<String>,
    pub census_tract: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Destination store for enriched citations.
pub struct CitationStore {
    conn: Mutex<Connection>,
}

impl CitationStore {
    /// Opens (or creates) the store file at `path`.
    ///
    /// The `ticketstat` table is not created here; see
    /// [`Self::create_table`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened citation store {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an empty, non-persistent store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Creates the `ticketstat` table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the DDL fails.
    pub fn create_table(&self) -> Result<(), DbError> {
        self.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS ticketstat (
                ticket_no TEXT NOT NULL,
                status TEXT,
                plate TEXT,
                plate_state TEXT,
                officer_badge_no TEXT,
                officer_name TEXT,
                squad TEXT,
                post TEXT,
                violation_code TEXT NOT NULL,
                infraction_text TEXT,
                fine DOUBLE,
                client_id TEXT,
                server TEXT,
                software TEXT,
                export_date TEXT,
                infraction_datetime TIMESTAMP,
                census_tract TEXT,
                street_address TEXT,
                street_num TEXT,
                street_name TEXT,
                city TEXT,
                state TEXT,
                zip TEXT,
                latitude DOUBLE,
                longitude DOUBLE,
                PRIMARY KEY (ticket_no, violation_code)
            );",
        )?;
        log::info!("Ensured ticketstat table exists");
        Ok(())
    }

    /// Upserts `rows`, returning the number of rows written.
    ///
    /// When `rows` contains the same key more than once, the last
    /// occurrence wins. All chunks are written in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any statement fails; nothing from this call
    /// is committed in that case.
    pub fn upsert(&self, rows: &[EnrichedCitationRow]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Keep the last occurrence of each key
        let mut last_seen: BTreeMap<CitationKey, usize> = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            last_seen.insert(row.key(), i);
        }
        let deduped: Vec<&EnrichedCitationRow> = rows
            .iter()
            .enumerate()
            .filter(|(i, row)| last_seen.get(&row.key()) == Some(i))
            .map(|(_, row)| row)
            .collect();

        if deduped.len() < rows.len() {
            log::info!(
                "Deduplicated upsert batch: {} -> {} rows ({} duplicates removed)",
                rows.len(),
                deduped.len(),
                rows.len() - deduped.len(),
            );
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut written = 0u64;

        for chunk in deduped.chunks(CHUNK_SIZE) {
            let sql = upsert_sql(chunk.len());
            let mut stmt = tx.prepare(&sql)?;
            let mut param_idx = 1usize;

            for row in chunk {
                let timestamp = row
                    .infraction_timestamp()
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());
                let geo = &row.geo;

                stmt.raw_bind_parameter(param_idx, &row.ticket_no)?;
                stmt.raw_bind_parameter(param_idx + 1, &row.status)?;
                stmt.raw_bind_parameter(param_idx + 2, &row.plate)?;
                stmt.raw_bind_parameter(param_idx + 3, &row.plate_state)?;
                stmt.raw_bind_parameter(param_idx + 4, &row.officer_badge_no)?;
                stmt.raw_bind_parameter(param_idx + 5, &row.officer_name)?;
                stmt.raw_bind_parameter(param_idx + 6, &row.squad)?;
                stmt.raw_bind_parameter(param_idx + 7, &row.post)?;
                stmt.raw_bind_parameter(param_idx + 8, &row.violation_code)?;
                stmt.raw_bind_parameter(param_idx + 9, &row.infraction_text)?;
                stmt.raw_bind_parameter(param_idx + 10, row.fine_amount())?;
                stmt.raw_bind_parameter(param_idx + 11, &row.client_id)?;
                stmt.raw_bind_parameter(param_idx + 12, &row.server)?;
                stmt.raw_bind_parameter(param_idx + 13, &row.software)?;
                stmt.raw_bind_parameter(param_idx + 14, &row.export_date)?;
                stmt.raw_bind_parameter(param_idx + 15, timestamp.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 16, geo.census_tract.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 17, &geo.resolved_address)?;
                stmt.raw_bind_parameter(param_idx + 18, geo.street_number.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 19, geo.street_name.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 20, geo.city.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 21, geo.state.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 22, geo.zip.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 23, geo.latitude)?;
                stmt.raw_bind_parameter(param_idx + 24, geo.longitude)?;

                param_idx += COLUMNS_PER_ROW;
            }

            stmt.raw_execute()?;
            written += chunk.len() as u64;
        }

        tx.commit()?;
        log::debug!("Upserted {written} citations");

        Ok(written)
    }

    /// Returns the number of stored citations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count(&self) -> Result<u64, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM ticketstat")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Looks up one citation by key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get(&self, key: &CitationKey) -> Result<Option<StoredCitation>, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT ticket_no, violation_code, status, plate, fine,
                    strftime(infraction_datetime, '%Y-%m-%d %H:%M:%S'),
                    street_address, census_tract, latitude, longitude
             FROM ticketstat
             WHERE ticket_no = ? AND violation_code = ?",
        )?;

        let mut rows = stmt.query(duckdb::params![key.ticket_no, key.violation_code])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        Ok(Some(StoredCitation {
            ticket_no: row.get(0)?,
            violation_code: row.get(1)?,
            status: row.get(2)?,
            plate: row.get(3)?,
            fine: row.get(4)?,
            infraction_datetime: row.get(5)?,
            street_address: row.get(6)?,
            census_tract: row.get(7)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn upsert_sql(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO ticketstat (
            ticket_no, status, plate, plate_state, officer_badge_no,
            officer_name, squad, post, violation_code, infraction_text,
            fine, client_id, server, software, export_date,
            infraction_datetime, census_tract, street_address, street_num,
            street_name, city, state, zip, latitude, longitude
        ) VALUES ",
    );

    let placeholders = format!("({})", vec!["?"; COLUMNS_PER_ROW].join(", "));
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&placeholders);
    }

    sql.push_str(
        " ON CONFLICT (ticket_no, violation_code) DO UPDATE SET
            status = EXCLUDED.status,
            plate = EXCLUDED.plate,
            plate_state = EXCLUDED.plate_state,
            officer_badge_no = EXCLUDED.officer_badge_no,
            officer_name = EXCLUDED.officer_name,
            squad = EXCLUDED.squad,
            post = EXCLUDED.post,
            infraction_text = EXCLUDED.infraction_text,
            fine = EXCLUDED.fine,
            client_id = EXCLUDED.client_id,
            server = EXCLUDED.server,
            software = EXCLUDED.software,
            export_date = EXCLUDED.export_date,
            infraction_datetime = EXCLUDED.infraction_datetime,
            census_tract = EXCLUDED.census_tract,
            street_address = EXCLUDED.street_address,
            street_num = EXCLUDED.street_num,
            street_name = EXCLUDED.street_name,
            city = EXCLUDED.city,
            state = EXCLUDED.state,
            zip = EXCLUDED.zip,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude",
    );

    sql
}

#[cfg(test)]
mod tests {
    use ticketstat_citation_models::{GeoResult, RawCitationRow, columns};

    use super::*;

    fn citation(ticket: &str, violation: &str, status: &str) -> EnrichedCitationRow {
        let raw: RawCitationRow = [
            (columns::TICKET_NO, ticket),
            (columns::STATUS, status),
            (columns::PLATE, "ABC1234"),
            (columns::VIOLATION_CODE, violation),
            (columns::FINE, "$32.00"),
        ]
        .into_iter()
        .collect();

        EnrichedCitationRow::new(
            &raw,
            "03/01/2020 14:05".to_string(),
            GeoResult {
                latitude: Some(39.294_1),
                longitude: Some(-76.615_4),
                resolved_address: "400 N Charles St, Baltimore, MD 21201".to_string(),
                census_tract: Some("110100".to_string()),
                provider: "geocodio".to_string(),
                ..GeoResult::default()
            },
        )
    }

    fn store() -> CitationStore {
        let store = CitationStore::open_in_memory().unwrap();
        store.create_table().unwrap();
        store
    }

    fn key(ticket: &str, violation: &str) -> CitationKey {
        CitationKey {
            ticket_no: ticket.to_string(),
            violation_code: violation.to_string(),
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = store();
        let rows = vec![citation("1001", "46", "OPEN"), citation("1002", "32", "OPEN")];

        assert_eq!(store.upsert(&rows).unwrap(), 2);
        assert_eq!(store.upsert(&rows).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn upsert_replaces_fields_on_key_match() {
        let store = store();
        store.upsert(&[citation("1001", "46", "OPEN")]).unwrap();
        store.upsert(&[citation("1001", "46", "PAID")]).unwrap();

        let stored = store.get(&key("1001", "46")).unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("PAID"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn same_ticket_with_different_violation_is_a_separate_row() {
        let store = store();
        store
            .upsert(&[citation("1001", "46", "OPEN"), citation("1001", "32", "OPEN")])
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn duplicate_keys_in_one_batch_keep_last() {
        let store = store();
        let written = store
            .upsert(&[citation("1001", "46", "OPEN"), citation("1001", "46", "VOID")])
            .unwrap();

        assert_eq!(written, 1);
        let stored = store.get(&key("1001", "46")).unwrap().unwrap();
        assert_eq!(stored.status.as_deref(), Some("VOID"));
    }

    #[test]
    fn stores_parsed_values() {
        let store = store();
        store.upsert(&[citation("1001", "46", "OPEN")]).unwrap();

        let stored = store.get(&key("1001", "46")).unwrap().unwrap();
        assert_eq!(stored.fine, Some(32.0));
        assert_eq!(stored.infraction_datetime.as_deref(), Some("2020-03-01 14:05:00"));
        assert_eq!(stored.census_tract.as_deref(), Some("110100"));
        assert_eq!(stored.latitude, Some(39.294_1));
    }

    #[test]
    fn null_coordinates_are_stored_as_null() {
        let store = store();
        let mut row = citation("1001", "46", "OPEN");
        row.geo.clear_coordinates();
        store.upsert(&[row]).unwrap();

        let stored = store.get(&key("1001", "46")).unwrap().unwrap();
        assert!(stored.latitude.is_none());
        assert!(stored.longitude.is_none());
        assert!(stored.street_address.is_some());
    }

    #[test]
    fn unparsable_timestamp_is_null() {
        let store = store();
        let mut row = citation("1001", "46", "OPEN");
        row.infraction_datetime = "not a date".to_string();
        store.upsert(&[row]).unwrap();

        let stored = store.get(&key("1001", "46")).unwrap().unwrap();
        assert!(stored.infraction_datetime.is_none());
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let store = store();
        assert_eq!(store.upsert(&[]).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.get(&key("1001", "46")).unwrap().is_none());
    }

    #[test]
    fn large_batches_span_chunks() {
        let store = store();
        let rows: Vec<_> = (0..CHUNK_SIZE + 5)
            .map(|i| citation(&i.to_string(), "46", "OPEN"))
            .collect();
        assert_eq!(store.upsert(&rows).unwrap(), (CHUNK_SIZE + 5) as u64);
        assert_eq!(store.count().unwrap(), (CHUNK_SIZE + 5) as u64);
    }
}
