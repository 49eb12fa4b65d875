#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Citation record types for the ticketstat ingestion pipeline.
//!
//! The ticketing portal exports one CSV row per ticket. Those rows are read
//! into [`RawCitationRow`] values keyed by the portal's column headers, then
//! enriched with a combined infraction timestamp and a [`GeoResult`] to
//! produce the [`EnrichedCitationRow`] that gets written to the store.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Column headers of the portal's CSV export.
pub mod columns {
    /// Ticket number (half of the natural key).
    pub const TICKET_NO: &str = "Ticket #";
    /// Ticket status code (e.g. `"OPEN"`, `"PAID"`).
    pub const STATUS: &str = "Status";
    /// License plate.
    pub const PLATE: &str = "Plate";
    /// License plate state/province.
    pub const PLATE_STATE: &str = "State";
    /// Badge number of the issuing officer.
    pub const OFFICER_BADGE_NO: &str = "Officer Badge No";
    /// Name of the issuing officer.
    pub const OFFICER_NAME: &str = "Officer Name";
    /// Officer's squad.
    pub const SQUAD: &str = "Squad";
    /// Officer's post / district.
    pub const POST: &str = "Post";
    /// Violation code (half of the natural key). The lowercase `v` is how
    /// the portal spells it.
    pub const VIOLATION_CODE: &str = "violation Code";
    /// Human-readable infraction description.
    pub const INFRACTION_TEXT: &str = "Infraction Text";
    /// Fine amount as displayed by the portal.
    pub const FINE: &str = "Fine";
    /// Handheld client identifier.
    pub const CLIENT_ID: &str = "Client Id";
    /// Server that owns the record.
    pub const SERVER: &str = "Server";
    /// Client software version.
    pub const SOFTWARE: &str = "Software";
    /// Date the ticket was exported from the handheld.
    pub const EXPORT_DATE: &str = "Export Date";
    /// Infraction date (`mm/dd/yyyy`).
    pub const INFRACTION_DATE: &str = "Infraction Date";
    /// Ticket creation time (`HH:MM`).
    pub const CREATION_TIME: &str = "Creation Time";
    /// House number of the infraction location.
    pub const CIVIC_NO: &str = "Civic #";
    /// Compass direction prefix of the street.
    pub const DIRECTION: &str = "Direction";
    /// Street name.
    pub const STREET: &str = "Street";
}

/// Natural identity of a citation in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitationKey {
    /// Ticket number.
    pub ticket_no: String,
    /// Violation code.
    pub violation_code: String,
}

/// One ticket as exported by the portal: column header -> cell value.
///
/// Missing columns read as empty strings, matching how the portal renders
/// blank cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCitationRow {
    fields: BTreeMap<String, String>,
}

impl RawCitationRow {
    /// Creates a row from a header -> value mapping.
    #[must_use]
    pub const fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Returns the trimmed value of `column`, or `""` if the column is absent.
    #[must_use]
    pub fn get(&self, column: &str) -> &str {
        self.fields.get(column).map_or("", |v| v.trim())
    }

    /// Ticket number of this row.
    #[must_use]
    pub fn ticket_number(&self) -> &str {
        self.get(columns::TICKET_NO)
    }

    /// Whether the row carries a non-empty ticket number.
    #[must_use]
    pub fn has_ticket_number(&self) -> bool {
        !self.ticket_number().is_empty()
    }

    /// The `(ticket number, violation code)` key of this row.
    #[must_use]
    pub fn key(&self) -> CitationKey {
        CitationKey {
            ticket_no: self.ticket_number().to_string(),
            violation_code: self.get(columns::VIOLATION_CODE).to_string(),
        }
    }

    /// Number of columns present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no columns at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawCitationRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Result of geocoding one address.
///
/// Coordinates are optional: they are nulled when the geocoder places the
/// address outside the target region, in which case the rest of the
/// metadata is still kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoResult {
    /// Latitude (WGS84).
    pub latitude: Option<f64>,
    /// Longitude (WGS84).
    pub longitude: Option<f64>,
    /// Canonical address returned by the geocoding service.
    pub resolved_address: String,
    /// House / block number as resolved.
    pub street_number: Option<String>,
    /// Street name as resolved.
    pub street_name: Option<String>,
    /// City.
    pub city: Option<String>,
    /// State abbreviation.
    pub state: Option<String>,
    /// Postal code.
    pub zip: Option<String>,
    /// Census tract code, if the provider returns one.
    pub census_tract: Option<String>,
    /// Identifier of the provider that produced this result.
    pub provider: String,
}

impl GeoResult {
    /// Whether both latitude and longitude are present.
    #[must_use]
    pub const fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Drops the coordinates, keeping every other field.
    pub const fn clear_coordinates(&mut self) {
        self.latitude = None;
        self.longitude = None;
    }
}

/// Timestamp formats the portal uses for `"{Infraction Date} {Creation Time}"`.
const INFRACTION_DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
];

/// A citation ready to be written to the store.
///
/// Carries every portal field except the address and date fragments, which
/// are replaced by [`Self::infraction_datetime`] and [`Self::geo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedCitationRow {
    pub ticket_no: String,
    pub status: String,
    pub plate: String,
    pub plate_state: String,
    pub officer_badge_no: String,
    pub officer_name: String,
    pub squad: String,
    pub post: String,
    pub violation_code: String,
    pub infraction_text: String,
    pub fine: String,
    pub client_id: String,
    pub server: String,
    pub software: String,
    pub export_date: String,
    /// `"{Infraction Date} {Creation Time}"` exactly as the portal split it.
    pub infraction_datetime: String,
    pub geo: GeoResult,
}

impl EnrichedCitationRow {
    /// Builds an enriched row from the non-location portal fields of `raw`.
    #[must_use]
    pub fn new(raw: &RawCitationRow, infraction_datetime: String, geo: GeoResult) -> Self {
        Self {
            ticket_no: raw.get(columns::TICKET_NO).to_string(),
            status: raw.get(columns::STATUS).to_string(),
            plate: raw.get(columns::PLATE).to_string(),
            plate_state: raw.get(columns::PLATE_STATE).to_string(),
            officer_badge_no: raw.get(columns::OFFICER_BADGE_NO).to_string(),
            officer_name: raw.get(columns::OFFICER_NAME).to_string(),
            squad: raw.get(columns::SQUAD).to_string(),
            post: raw.get(columns::POST).to_string(),
            violation_code: raw.get(columns::VIOLATION_CODE).to_string(),
            infraction_text: raw.get(columns::INFRACTION_TEXT).to_string(),
            fine: raw.get(columns::FINE).to_string(),
            client_id: raw.get(columns::CLIENT_ID).to_string(),
            server: raw.get(columns::SERVER).to_string(),
            software: raw.get(columns::SOFTWARE).to_string(),
            export_date: raw.get(columns::EXPORT_DATE).to_string(),
            infraction_datetime,
            geo,
        }
    }

    /// The `(ticket number, violation code)` key of this row.
    #[must_use]
    pub fn key(&self) -> CitationKey {
        CitationKey {
            ticket_no: self.ticket_no.clone(),
            violation_code: self.violation_code.clone(),
        }
    }

    /// Parses [`Self::infraction_datetime`], or `None` if the portal sent
    /// something unrecognizable.
    #[must_use]
    pub fn infraction_timestamp(&self) -> Option<NaiveDateTime> {
        let s = self.infraction_datetime.trim();
        INFRACTION_DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    }

    /// Parses the fine amount, ignoring `$` and thousands separators.
    #[must_use]
    pub fn fine_amount(&self) -> Option<f64> {
        let cleaned: String = self
            .fine
            .chars()
            .filter(|c| !matches!(c, '$' | ',' | ' '))
            .collect();
        cleaned.parse().ok()
    }
}
