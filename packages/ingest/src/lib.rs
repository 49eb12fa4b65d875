#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parking citation ingestion pipeline.
//!
//! For each requested date the [`Pipeline`] fetches the day's citations
//! from the portal, enriches them with block-level coordinates, and upserts
//! them into the citation store:
//!
//! ```text
//! CitationSource::fetch_date -> Enricher::enrich -> CitationStore::upsert
//! ```
//!
//! Failures are contained at the smallest scope that makes sense. A row
//! that cannot be geocoded is dropped. A date the portal returns nothing
//! for yields [`DateOutcome::NoRows`], and a date whose store write fails
//! yields [`DateOutcome::Failed`] inside a range. Only rejected credentials
//! stop a multi-day run.

pub mod config;
pub mod enrich;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use futures::{StreamExt, TryStreamExt};
use ticketstat_citation_models::RawCitationRow;
use ticketstat_cli_utils::{NullProgress, ProgressCallback};
use ticketstat_database::DbError;
use ticketstat_database::citation_db::CitationStore;
use ticketstat_database::geocode_cache::GeoCache;
use ticketstat_database::paths;
use ticketstat_geocoder::address::AddressNormalizer;
use ticketstat_geocoder::{GeocodeError, Geocoder, build_provider};
use ticketstat_portal::{PortalClient, PortalError};

use crate::config::{Credentials, IngestConfig};
use crate::enrich::Enricher;

/// Errors that stop a run (or a single date).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Missing or inconsistent configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// The configuration file is not valid TOML for [`IngestConfig`].
    #[error("Invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error (e.g. reading the configuration file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Portal failure that cannot be confined to one date.
    #[error("Portal error: {0}")]
    Portal(#[from] PortalError),

    /// The geocoder could not be set up.
    #[error("Geocoder error: {0}")]
    Geocoder(#[from] GeocodeError),

    /// Writing to the citation store or the geocode cache failed.
    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

/// Where raw citations come from.
#[async_trait]
pub trait CitationSource: Send + Sync {
    /// All citations with an infraction on `date`.
    ///
    /// # Errors
    ///
    /// Returns the portal's error; see [`PortalClient::search`].
    async fn fetch_date(&self, date: NaiveDate) -> Result<Vec<RawCitationRow>, PortalError>;
}

#[async_trait]
impl CitationSource for PortalClient {
    async fn fetch_date(&self, date: NaiveDate) -> Result<Vec<RawCitationRow>, PortalError> {
        self.search_by_date(date).await
    }
}

/// What happened to one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateOutcome {
    /// Citations were written.
    Stored {
        /// Rows upserted into the store.
        rows_written: u64,
        /// Rows the portal returned.
        fetched: usize,
        /// Rows skipped for lack of a street or a geocode.
        dropped: usize,
    },
    /// Nothing was written.
    NoRows {
        /// Why.
        reason: String,
    },
    /// Writing the date's rows failed; nothing from the date is committed.
    Failed {
        /// The store error.
        reason: String,
    },
}

impl DateOutcome {
    /// Rows upserted for the date.
    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        match self {
            Self::Stored { rows_written, .. } => *rows_written,
            Self::NoRows { .. } | Self::Failed { .. } => 0,
        }
    }
}

impl std::fmt::Display for DateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stored {
                rows_written,
                fetched,
                dropped,
            } => write!(
                f,
                "{rows_written} rows written ({fetched} fetched, {dropped} dropped)"
            ),
            Self::NoRows { reason } => write!(f, "0 rows: {reason}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Fetch, enrich, and store citations one date at a time.
pub struct Pipeline {
    source: Box<dyn CitationSource>,
    enricher: Enricher,
    store: Arc<CitationStore>,
}

impl Pipeline {
    #[must_use]
    pub const fn new(
        source: Box<dyn CitationSource>,
        enricher: Enricher,
        store: Arc<CitationStore>,
    ) -> Self {
        Self {
            source,
            enricher,
            store,
        }
    }

    /// Opens the stores, builds the geocoder, and logs in to the portal.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] if a database cannot be opened,
    /// [`IngestError::Geocoder`] if the provider is misconfigured, or
    /// [`IngestError::Portal`] if the login is rejected.
    pub async fn connect(
        config: &IngestConfig,
        credentials: &Credentials,
        geocoder_api_key: Option<String>,
    ) -> Result<Self, IngestError> {
        let data_dir = config.storage.resolved_data_dir();
        log::info!("Using data directory {}", data_dir.display());

        let store = Arc::new(CitationStore::open(&paths::citations_db_path(&data_dir))?);
        let cache = Arc::new(GeoCache::open(&paths::geocode_cache_db_path(&data_dir))?);

        let provider = build_provider(
            &config.geocoder.provider,
            config.geocoder.http_client()?,
            geocoder_api_key,
        )?;
        let geocoder = Geocoder::new(provider, config.geocoder.retry, &config.region.county);
        log::info!("Geocoding with {}", geocoder.provider_id());

        let enricher = Enricher::new(
            AddressNormalizer::new(&config.region.city, &config.region.region),
            geocoder,
            cache,
            config.region.bounding_box,
        );

        let portal = PortalClient::login(
            config.portal.endpoints.clone(),
            config.portal.retry,
            &credentials.username,
            &credentials.password,
        )
        .await?;

        Ok(Self::new(Box::new(portal), enricher, store))
    }

    /// The destination store.
    #[must_use]
    pub fn store(&self) -> &CitationStore {
        &self.store
    }

    /// The geocode cache.
    #[must_use]
    pub fn cache(&self) -> &GeoCache {
        self.enricher.cache()
    }

    /// Processes one date.
    ///
    /// A date the portal has nothing for is not an error; it is reported
    /// as [`DateOutcome::NoRows`].
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Portal`] for authentication failures and
    /// [`IngestError::Store`] if the upsert fails. Nothing from the date is
    /// committed in the latter case.
    pub async fn run_for_date(
        &self,
        date: NaiveDate,
        progress: &dyn ProgressCallback,
    ) -> Result<DateOutcome, IngestError> {
        log::info!("Fetching citations for {date}");
        progress.set_message(&format!("{date}: fetching"));

        let raw = match self.source.fetch_date(date).await {
            Ok(rows) => rows,
            Err(e @ PortalError::Auth) => return Err(e.into()),
            Err(e) => {
                log::warn!("No citations for {date}: {e}");
                return Ok(DateOutcome::NoRows {
                    reason: e.to_string(),
                });
            }
        };

        let fetched = raw.len();
        progress.set_message(&format!("{date}: geocoding"));
        let outcome = self.enricher.enrich(&raw, progress).await;
        let dropped = outcome.stats.dropped();

        if outcome.rows.is_empty() {
            let reason = format!("none of the {fetched} fetched rows could be located");
            log::warn!("Nothing to store for {date}: {reason}");
            return Ok(DateOutcome::NoRows { reason });
        }

        let rows_written = self.store.upsert(&outcome.rows)?;
        log::info!("{date}: wrote {rows_written} rows ({fetched} fetched, {dropped} dropped)");

        Ok(DateOutcome::Stored {
            rows_written,
            fetched,
            dropped,
        })
    }

    /// Processes `num_days` consecutive dates starting at `start`, up to
    /// `concurrency` of them at a time.
    ///
    /// Results are returned in date order, one per date. A date whose
    /// store write fails is reported as [`DateOutcome::Failed`] and the
    /// run moves on. `progress` advances once per finished date.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Portal`] if the portal rejects the session.
    /// Dates already stored stay stored.
    pub async fn run_for_date_range(
        &self,
        start: NaiveDate,
        num_days: u32,
        concurrency: usize,
        progress: &dyn ProgressCallback,
    ) -> Result<Vec<(NaiveDate, DateOutcome)>, IngestError> {
        let dates = date_range(start, num_days);
        progress.set_total(dates.len() as u64);

        let mut results: Vec<(NaiveDate, DateOutcome)> = futures::stream::iter(dates)
            .map(|date| async move {
                let outcome = match self.run_for_date(date, &NullProgress).await {
                    Ok(outcome) => Ok(outcome),
                    Err(e @ IngestError::Portal(PortalError::Auth)) => Err(e),
                    Err(e) => {
                        log::error!("{date}: {e}");
                        Ok(DateOutcome::Failed {
                            reason: e.to_string(),
                        })
                    }
                };
                progress.inc(1);
                outcome.map(|outcome| (date, outcome))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;

        results.sort_by_key(|(date, _)| *date);

        let total: u64 = results.iter().map(|(_, o)| o.rows_written()).sum();
        progress.finish(&format!("{total} rows written"));

        Ok(results)
    }

    /// Flushes the geocode cache to disk.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Store`] if the checkpoint fails.
    pub fn checkpoint(&self) -> Result<(), IngestError> {
        self.cache().save()?;
        Ok(())
    }
}

/// `start`, `start + 1`, ... for `num_days` days, stopping early at the end
/// of the calendar.
#[must_use]
pub fn date_range(start: NaiveDate, num_days: u32) -> Vec<NaiveDate> {
    (0..u64::from(num_days))
        .map_while(|i| start.checked_add_days(Days::new(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::enrich::tests::{FixedProvider, enricher, raw_row};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, d).unwrap()
    }

    /// Serves canned rows per date; dates without rows come back empty the
    /// way an exhausted portal search does.
    struct FakeSource {
        rows: BTreeMap<NaiveDate, Vec<RawCitationRow>>,
        reject_auth: bool,
    }

    impl FakeSource {
        fn new(rows: BTreeMap<NaiveDate, Vec<RawCitationRow>>) -> Self {
            Self {
                rows,
                reject_auth: false,
            }
        }
    }

    #[async_trait]
    impl CitationSource for FakeSource {
        async fn fetch_date(&self, date: NaiveDate) -> Result<Vec<RawCitationRow>, PortalError> {
            if self.reject_auth {
                return Err(PortalError::Auth);
            }
            self.rows
                .get(&date)
                .cloned()
                .ok_or_else(|| PortalError::EmptyResult {
                    reason: "no valid result after 7 attempts".to_string(),
                })
        }
    }

    fn pipeline(source: FakeSource) -> Pipeline {
        let pipeline = pipeline_without_table(source);
        pipeline.store().create_table().unwrap();
        pipeline
    }

    fn pipeline_without_table(source: FakeSource) -> Pipeline {
        let store = CitationStore::open_in_memory().unwrap();
        Pipeline::new(
            Box::new(source),
            enricher(FixedProvider::at(39.294_1, -76.615_4)),
            Arc::new(store),
        )
    }

    fn march_first() -> BTreeMap<NaiveDate, Vec<RawCitationRow>> {
        BTreeMap::from([(
            day(1),
            vec![
                raw_row("1001", "415", "N", "Charles St"),
                raw_row("1002", "742", "S", "Broadway"),
                raw_row("1003", "10", "", ""),
            ],
        )])
    }

    #[tokio::test]
    async fn stores_located_rows_for_a_date() {
        let pipeline = pipeline(FakeSource::new(march_first()));

        let outcome = pipeline.run_for_date(day(1), &NullProgress).await.unwrap();

        assert_eq!(
            outcome,
            DateOutcome::Stored {
                rows_written: 2,
                fetched: 3,
                dropped: 1,
            }
        );
        assert_eq!(pipeline.store().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn rerunning_a_date_creates_no_duplicates() {
        let pipeline = pipeline(FakeSource::new(march_first()));

        pipeline.run_for_date(day(1), &NullProgress).await.unwrap();
        pipeline.run_for_date(day(1), &NullProgress).await.unwrap();

        assert_eq!(pipeline.store().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_date_is_not_an_error() {
        let pipeline = pipeline(FakeSource::new(BTreeMap::new()));

        let outcome = pipeline.run_for_date(day(2), &NullProgress).await.unwrap();

        assert!(matches!(outcome, DateOutcome::NoRows { .. }));
        assert_eq!(outcome.rows_written(), 0);
    }

    #[tokio::test]
    async fn date_with_only_unlocatable_rows_stores_nothing() {
        let rows = BTreeMap::from([(day(1), vec![raw_row("1003", "10", "", "")])]);
        let pipeline = pipeline(FakeSource::new(rows));

        let outcome = pipeline.run_for_date(day(1), &NullProgress).await.unwrap();

        assert!(matches!(outcome, DateOutcome::NoRows { .. }));
        assert_eq!(pipeline.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_range() {
        let mut source = FakeSource::new(march_first());
        source.reject_auth = true;
        let pipeline = pipeline(source);

        let err = pipeline
            .run_for_date_range(day(1), 3, 1, &NullProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Portal(PortalError::Auth)));
    }

    #[tokio::test]
    async fn range_reports_every_date_in_order() {
        let mut rows = march_first();
        rows.insert(day(3), vec![raw_row("3001", "200", "E", "Fayette St")]);
        let pipeline = pipeline(FakeSource::new(rows));

        let results = pipeline
            .run_for_date_range(day(1), 3, 3, &NullProgress)
            .await
            .unwrap();

        let dates: Vec<_> = results.iter().map(|(d, _)| *d).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(results[0].1.rows_written(), 2);
        assert!(matches!(results[1].1, DateOutcome::NoRows { .. }));
        assert_eq!(results[2].1.rows_written(), 1);
        assert_eq!(pipeline.store().count().unwrap(), 3);
    }

    #[tokio::test]
    async fn store_failure_fails_only_that_date() {
        let mut rows = BTreeMap::from([(day(2), vec![raw_row("2001", "415", "N", "Charles St")])]);
        rows.insert(day(3), vec![raw_row("3001", "200", "E", "Fayette St")]);
        let pipeline = pipeline_without_table(FakeSource::new(rows));

        let results = pipeline
            .run_for_date_range(day(1), 3, 1, &NullProgress)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, day(1));
        assert!(matches!(results[0].1, DateOutcome::NoRows { .. }));
        for (date, outcome) in &results[1..] {
            let DateOutcome::Failed { reason } = outcome else {
                panic!("{date}: expected a failed outcome, got {outcome}");
            };
            assert!(reason.contains("ticketstat"), "{reason}");
        }
    }

    #[tokio::test]
    async fn single_date_store_failure_is_an_error() {
        let rows = BTreeMap::from([(day(2), vec![raw_row("2001", "415", "N", "Charles St")])]);
        let pipeline = pipeline_without_table(FakeSource::new(rows));

        let err = pipeline.run_for_date(day(2), &NullProgress).await.unwrap_err();

        assert!(matches!(err, IngestError::Store(_)));
    }

    #[test]
    fn date_range_is_consecutive() {
        assert_eq!(
            date_range(day(30), 3),
            vec![day(30), day(31), NaiveDate::from_ymd_opt(2020, 4, 1).unwrap()]
        );
        assert!(date_range(day(1), 0).is_empty());
    }

    #[test]
    fn outcome_display() {
        let stored = DateOutcome::Stored {
            rows_written: 5,
            fetched: 7,
            dropped: 2,
        };
        assert_eq!(stored.to_string(), "5 rows written (7 fetched, 2 dropped)");
        assert_eq!(
            DateOutcome::NoRows {
                reason: "empty".to_string()
            }
            .to_string(),
            "0 rows: empty"
        );
        assert_eq!(
            DateOutcome::Failed {
                reason: "disk full".to_string()
            }
            .to_string(),
            "failed: disk full"
        );
    }
}
