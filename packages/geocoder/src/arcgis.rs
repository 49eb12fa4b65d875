//! `ArcGIS` World Geocoder provider.
//!
//! Uses the keyless `findAddressCandidates` endpoint of the public
//! `GeocodeServer`. Candidates are disambiguated by their `Subregion`
//! attribute, which holds the county (`"Baltimore City"` for the city
//! itself, `"Baltimore County"` for its suburbs).

use async_trait::async_trait;
use ticketstat_citation_models::GeoResult;

use crate::{Candidate, GeocodeError, GeocodingProvider, json_f64, json_string};

/// Provider identifier stored with results.
pub const PROVIDER_ID: &str = "arcgis";

/// Default `findAddressCandidates` endpoint.
pub const DEFAULT_BASE_URL: &str =
    "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates";

/// Candidates scoring below this are ignored.
const MIN_SCORE: f64 = 80.0;

#[derive(Debug, Clone)]
pub struct ArcgisProvider {
    client: reqwest::Client,
    base_url: String,
}

impl ArcgisProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl GeocodingProvider for ArcgisProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn candidates(&self, address: &str) -> Result<Vec<Candidate>, GeocodeError> {
        let body: serde_json::Value = self
            .client
            .get(&self.base_url)
            .query(&[
                ("SingleLine", address),
                ("outFields", "AddNum,StAddr,City,Subregion,RegionAbbr,Postal"),
                ("maxLocations", "5"),
                ("f", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(&body)
    }
}

fn parse_response(body: &serde_json::Value) -> Result<Vec<Candidate>, GeocodeError> {
    if let Some(message) = json_string(&body["error"]["message"]) {
        return Err(GeocodeError::parse(format!("ArcGIS error: {message}")));
    }

    let candidates = body["candidates"]
        .as_array()
        .ok_or_else(|| GeocodeError::parse("Missing candidates array"))?;

    Ok(candidates
        .iter()
        .filter(|c| json_f64(&c["score"]).unwrap_or(0.0) >= MIN_SCORE)
        .map(parse_candidate)
        .collect())
}

fn parse_candidate(c: &serde_json::Value) -> Candidate {
    let attributes = &c["attributes"];

    let result = GeoResult {
        latitude: json_f64(&c["location"]["y"]),
        longitude: json_f64(&c["location"]["x"]),
        resolved_address: json_string(&c["address"]).unwrap_or_default(),
        street_number: json_string(&attributes["AddNum"]),
        street_name: json_string(&attributes["StAddr"]),
        city: json_string(&attributes["City"]),
        state: json_string(&attributes["RegionAbbr"]),
        zip: json_string(&attributes["Postal"]),
        census_tract: None,
        provider: PROVIDER_ID.to_string(),
    };

    Candidate {
        result,
        locality: json_string(&attributes["Subregion"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select_candidate;

    #[test]
    fn parses_candidates_above_threshold() {
        let body = serde_json::json!({
            "spatialReference": { "wkid": 4326 },
            "candidates": [
                {
                    "address": "400 N Charles St, Baltimore, Maryland, 21201",
                    "location": { "x": -76.615_4, "y": 39.294_1 },
                    "score": 100,
                    "attributes": {
                        "AddNum": "400",
                        "StAddr": "400 N Charles St",
                        "City": "Baltimore",
                        "Subregion": "Baltimore City",
                        "RegionAbbr": "MD",
                        "Postal": "21201"
                    }
                },
                {
                    "address": "Charles St, Baltimore, Maryland",
                    "location": { "x": -76.61, "y": 39.3 },
                    "score": 62.5,
                    "attributes": { "City": "Baltimore" }
                }
            ]
        });

        let candidates = parse_response(&body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].locality.as_deref(), Some("Baltimore City"));
        assert_eq!(candidates[0].result.zip.as_deref(), Some("21201"));
        assert_eq!(candidates[0].result.longitude, Some(-76.615_4));
    }

    #[test]
    fn picks_the_city_candidate_over_the_county_one() {
        let body = serde_json::json!({
            "candidates": [
                {
                    "address": "400 N Charles St, Towson, Maryland, 21204",
                    "location": { "x": -76.60, "y": 39.40 },
                    "score": 95,
                    "attributes": { "City": "Towson", "Subregion": "Baltimore County" }
                },
                {
                    "address": "400 N Charles St, Baltimore, Maryland, 21201",
                    "location": { "x": -76.615_4, "y": 39.294_1 },
                    "score": 100,
                    "attributes": { "City": "Baltimore", "Subregion": "Baltimore City" }
                }
            ]
        });

        let candidates = parse_response(&body).unwrap();
        assert_eq!(candidates.len(), 2);

        let chosen = select_candidate(candidates, "Baltimore City").unwrap();
        assert_eq!(chosen.city.as_deref(), Some("Baltimore"));
        assert_eq!(chosen.latitude, Some(39.294_1));
    }

    #[test]
    fn service_error_is_parse_error() {
        let body = serde_json::json!({
            "error": { "code": 498, "message": "Invalid Token" }
        });
        assert!(matches!(parse_response(&body), Err(GeocodeError::Parse { .. })));
    }
}
