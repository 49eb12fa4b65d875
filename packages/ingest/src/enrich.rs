//! Turns raw portal rows into store-ready citations.
//!
//! Each row is handled on its own: its address is normalized, resolved
//! through the [`GeoCache`] (falling back to the [`Geocoder`] on a miss),
//! and checked against the region's bounding box. A row that cannot be
//! located is dropped and logged; nothing a single row does can fail the
//! batch.

use std::sync::Arc;

use ticketstat_citation_models::{EnrichedCitationRow, GeoResult, RawCitationRow, columns};
use ticketstat_cli_utils::ProgressCallback;
use ticketstat_database::geocode_cache::GeoCache;
use ticketstat_geocoder::address::{AddressNormalizer, NormalizedAddress};
use ticketstat_geocoder::{BoundingBox, GeocodeError, Geocoder};

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    /// Rows handed to the enricher.
    pub input: usize,
    /// Rows skipped because they have no street.
    pub skipped_no_street: usize,
    /// Rows dropped because their address could not be geocoded.
    pub not_found: usize,
    /// Addresses answered by the cache.
    pub cache_hits: usize,
    /// Addresses sent to the geocoder.
    pub cache_misses: usize,
    /// Rows kept with their coordinates nulled.
    pub out_of_region: usize,
}

impl EnrichStats {
    /// Rows that did not make it into the output.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.skipped_no_street + self.not_found
    }
}

/// Output of [`Enricher::enrich`].
#[derive(Debug, Clone, Default)]
pub struct EnrichOutcome {
    pub rows: Vec<EnrichedCitationRow>,
    pub stats: EnrichStats,
}

/// Combines address normalization, cached geocoding, and region checks.
pub struct Enricher {
    normalizer: AddressNormalizer,
    geocoder: Geocoder,
    cache: Arc<GeoCache>,
    bounding_box: BoundingBox,
}

impl Enricher {
    #[must_use]
    pub const fn new(
        normalizer: AddressNormalizer,
        geocoder: Geocoder,
        cache: Arc<GeoCache>,
        bounding_box: BoundingBox,
    ) -> Self {
        Self {
            normalizer,
            geocoder,
            cache,
            bounding_box,
        }
    }

    /// The cache consulted before every geocode.
    #[must_use]
    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    /// Enriches every row that can be located.
    pub async fn enrich(
        &self,
        rows: &[RawCitationRow],
        progress: &dyn ProgressCallback,
    ) -> EnrichOutcome {
        let mut outcome = EnrichOutcome {
            rows: Vec::with_capacity(rows.len()),
            stats: EnrichStats {
                input: rows.len(),
                ..EnrichStats::default()
            },
        };

        progress.set_total(rows.len() as u64);

        for row in rows {
            if let Some(enriched) = self.enrich_row(row, &mut outcome.stats).await {
                outcome.rows.push(enriched);
            }
            progress.inc(1);
        }

        let stats = &outcome.stats;
        log::info!(
            "Enriched {}/{} rows: {} cache hits, {} geocoded, {} without street, {} not found, {} out of region",
            outcome.rows.len(),
            stats.input,
            stats.cache_hits,
            stats.cache_misses,
            stats.skipped_no_street,
            stats.not_found,
            stats.out_of_region,
        );

        outcome
    }

    async fn enrich_row(
        &self,
        row: &RawCitationRow,
        stats: &mut EnrichStats,
    ) -> Option<EnrichedCitationRow> {
        let address = self.normalizer.normalize(
            row.get(columns::CIVIC_NO),
            row.get(columns::DIRECTION),
            row.get(columns::STREET),
        );

        if !address.is_locatable() {
            log::debug!("Ticket {} has no street, skipping", row.ticket_number());
            stats.skipped_no_street += 1;
            return None;
        }

        let mut geo = match self.locate(&address, stats).await {
            Ok(geo) => geo,
            Err(e) => {
                log::warn!("No geocode result for ticket {}: {e}", row.ticket_number());
                stats.not_found += 1;
                return None;
            }
        };

        if self.bounding_box.sanitize(&mut geo) {
            stats.out_of_region += 1;
        }

        let infraction_datetime = format!(
            "{} {}",
            row.get(columns::INFRACTION_DATE),
            row.get(columns::CREATION_TIME)
        );

        Some(EnrichedCitationRow::new(row, infraction_datetime, geo))
    }

    /// Cache first, geocoder on a miss. Successful lookups are written back
    /// to the cache before returning.
    async fn locate(
        &self,
        address: &NormalizedAddress,
        stats: &mut EnrichStats,
    ) -> Result<GeoResult, GeocodeError> {
        if let Some(hit) = self.cache.get(address.as_str()) {
            stats.cache_hits += 1;
            return Ok(hit);
        }

        stats.cache_misses += 1;
        let geo = self.geocoder.resolve(address.as_str()).await?;

        if let Err(e) = self.cache.put(address.as_str(), &geo) {
            log::error!("Failed to cache geocode for {address}: {e}");
        }

        Ok(geo)
    }
}
