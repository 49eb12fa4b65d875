//! Parsing of the portal's CSV ticket export.
//!
//! Every data row becomes a [`RawCitationRow`] keyed by the trimmed column
//! headers of the first row.

use ticketstat_citation_models::RawCitationRow;

use crate::PortalError;

/// Parses a CSV export body into rows.
///
/// # Errors
///
/// Returns [`PortalError::Csv`] if the body is not readable CSV.
pub fn parse_export(body: &str) -> Result<Vec<RawCitationRow>, PortalError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_owned())
        .collect();

    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result?;
        let row: RawCitationRow = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").trim().to_owned()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Parses an export and checks that it looks like a real result set.
///
/// The portal answers some failed searches (expired sessions, overloaded
/// servers) with an HTML page or a header-only CSV, so a response only
/// counts as valid when at least one row carries a ticket number.
///
/// # Errors
///
/// Returns [`PortalError::Csv`] for unreadable bodies and
/// [`PortalError::NoTicketRows`] when no row has a ticket number.
pub fn parse_validated_export(body: &str) -> Result<Vec<RawCitationRow>, PortalError> {
    let rows = parse_export(body)?;

    if rows.iter().any(RawCitationRow::has_ticket_number) {
        Ok(rows)
    } else {
        Err(PortalError::NoTicketRows)
    }
}
