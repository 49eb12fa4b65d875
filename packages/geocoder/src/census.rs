//! US Census Bureau Geocoder provider.
//!
//! Uses the free one-line geographies endpoint, which also returns the
//! county and census tract of each match. No API key required.
//!
//! - `GET /geographies/onelineaddress?address=...&benchmark=...&vintage=...`
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use ticketstat_citation_models::GeoResult;

use crate::{Candidate, GeocodeError, GeocodingProvider, json_f64, json_string};

/// Provider identifier stored with results.
pub const PROVIDER_ID: &str = "census";

/// Census Bureau geocoding client.
#[derive(Debug, Clone)]
pub struct CensusProvider {
    client: reqwest::Client,
    base_url: String,
    benchmark: String,
    vintage: String,
}

impl CensusProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, benchmark: &str, vintage: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            benchmark: benchmark.to_string(),
            vintage: vintage.to_string(),
        }
    }
}

#[async_trait]
impl GeocodingProvider for CensusProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn candidates(&self, address: &str) -> Result<Vec<Candidate>, GeocodeError> {
        let url = format!("{}/geographies/onelineaddress", self.base_url);

        let body: serde_json::Value = self
            .client
            .get(&url)
            .query(&[
                ("address", address),
                ("benchmark", self.benchmark.as_str()),
                ("vintage", self.vintage.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(&body)
    }
}

/// Parses the JSON response from the geographies endpoint.
fn parse_response(body: &serde_json::Value) -> Result<Vec<Candidate>, GeocodeError> {
    let matches = body["result"]["addressMatches"]
        .as_array()
        .ok_or_else(|| GeocodeError::parse("Missing addressMatches array"))?;

    Ok(matches.iter().map(parse_match).collect())
}

fn parse_match(m: &serde_json::Value) -> Candidate {
    let components = &m["addressComponents"];
    let geographies = &m["geographies"];

    let street_name = [
        &components["preDirection"],
        &components["streetName"],
        &components["suffixType"],
        &components["suffixDirection"],
    ]
    .into_iter()
    .filter_map(json_string)
    .collect::<Vec<_>>()
    .join(" ");

    let result = GeoResult {
        latitude: json_f64(&m["coordinates"]["y"]),
        longitude: json_f64(&m["coordinates"]["x"]),
        resolved_address: json_string(&m["matchedAddress"]).unwrap_or_default(),
        street_number: json_string(&components["fromAddress"]),
        street_name: (!street_name.is_empty()).then_some(street_name),
        city: json_string(&components["city"]),
        state: json_string(&components["state"]),
        zip: json_string(&components["zip"]),
        census_tract: json_string(&geographies["Census Tracts"][0]["TRACT"]),
        provider: PROVIDER_ID.to_string(),
    };

    Candidate {
        result,
        locality: json_string(&geographies["Counties"][0]["NAME"]),
    }
}
