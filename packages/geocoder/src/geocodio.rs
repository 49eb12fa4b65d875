//! Geocodio provider.
//!
//! `GET {base_url}?q={address}&fields=census&api_key={key}` returns a
//! `results` array; each result carries its county, which is used to pick
//! between several matches, and the census tract under
//! `fields.census.{year}.tract_code`.

use async_trait::async_trait;
use ticketstat_citation_models::GeoResult;

use crate::{Candidate, GeocodeError, GeocodingProvider, json_f64, json_string};

/// Provider identifier stored with results.
pub const PROVIDER_ID: &str = "geocodio";

/// Default geocode endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.geocod.io/v1.6/geocode";

/// Geocodio API client.
#[derive(Clone)]
pub struct GeocodioProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for GeocodioProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodioProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeocodioProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl GeocodingProvider for GeocodioProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn candidates(&self, address: &str) -> Result<Vec<Candidate>, GeocodeError> {
        let body: serde_json::Value = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", address),
                ("fields", "census"),
                ("api_key", self.api_key.as_str()),
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
    let results = body["results"]
        .as_array()
        .ok_or_else(|| GeocodeError::parse("Missing results array"))?;

    Ok(results.iter().map(parse_result).collect())
}

fn parse_result(r: &serde_json::Value) -> Candidate {
    let components = &r["address_components"];

    let result = GeoResult {
        latitude: json_f64(&r["location"]["lat"]),
        longitude: json_f64(&r["location"]["lng"]),
        resolved_address: json_string(&r["formatted_address"]).unwrap_or_default(),
        street_number: json_string(&components["number"]),
        street_name: json_string(&components["formatted_street"]),
        city: json_string(&components["city"]),
        state: json_string(&components["state"]),
        zip: json_string(&components["zip"]),
        census_tract: census_tract(&r["fields"]["census"]),
        provider: PROVIDER_ID.to_string(),
    };

    Candidate {
        result,
        locality: json_string(&components["county"]),
    }
}

/// Tract code of the most recent census year present.
fn census_tract(census: &serde_json::Value) -> Option<String> {
    census
        .as_object()?
        .iter()
        .max_by(|a, b| a.0.cmp(b.0))
        .and_then(|(_, year)| json_string(&year["tract_code"]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(county: &str, lat: f64) -> serde_json::Value {
        serde_json::json!({
            "address_components": {
                "number": "700",
                "predirectional": "S",
                "street": "Broadway",
                "formatted_street": "S Broadway",
                "city": "Baltimore",
                "county": county,
                "state": "MD",
                "zip": "21231"
            },
            "formatted_address": "700 S Broadway, Baltimore, MD 21231",
            "location": { "lat": lat, "lng": -76.593_2 },
            "accuracy": 1,
            "fields": {
                "census": {
                    "2010": { "tract_code": "020200" },
                    "2020": { "tract_code": "020300" }
                }
            }
        })
    }

    #[test]
    fn parses_results() {
        let body = serde_json::json!({
            "input": {},
            "results": [result("Baltimore City", 39.284_5)]
        });

        let candidates = parse_response(&body).unwrap();
        assert_eq!(candidates.len(), 1);

        let c = &candidates[0];
        assert_eq!(c.locality.as_deref(), Some("Baltimore City"));
        assert_eq!(c.result.resolved_address, "700 S Broadway, Baltimore, MD 21231");
        assert_eq!(c.result.street_number.as_deref(), Some("700"));
        assert_eq!(c.result.street_name.as_deref(), Some("S Broadway"));
        assert_eq!(c.result.census_tract.as_deref(), Some("020300"));
        assert_eq!(c.result.latitude, Some(39.284_5));
    }

    #[test]
    fn keeps_every_result_for_disambiguation() {
        let body = serde_json::json!({
            "results": [result("Baltimore County", 39.38), result("Baltimore City", 39.28)]
        });
        let candidates = parse_response(&body).unwrap();
        let picked = crate::select_candidate(candidates, "baltimore city").unwrap();
        assert_eq!(picked.latitude, Some(39.28));
    }

    #[test]
    fn missing_census_fields_leave_tract_empty() {
        let mut r = result("Baltimore City", 39.28);
        r["fields"] = serde_json::json!({});
        let candidates = parse_response(&serde_json::json!({ "results": [r] })).unwrap();
        assert!(candidates[0].result.census_tract.is_none());
    }

    #[test]
    fn error_body_is_parse_error() {
        let body = serde_json::json!({ "error": "Invalid API key" });
        assert!(matches!(parse_response(&body), Err(GeocodeError::Parse { .. })));
    }
}
