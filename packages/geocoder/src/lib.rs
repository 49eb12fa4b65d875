#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding for parking citation locations.
//!
//! Converts normalized block addresses to coordinates through one of
//! several interchangeable providers, selected in configuration:
//!
//! 1. **Geocodio**: commercial API with census tract enrichment.
//! 2. **US Census Bureau**: free one-line geographies lookup.
//! 3. **`ArcGIS` World Geocoder**: free `findAddressCandidates` endpoint.
//!
//! Every provider returns a list of [`Candidate`]s. [`Geocoder`] wraps the
//! provider call in a [`RetryPolicy`] and then picks one candidate with
//! [`select_candidate`]: a single candidate is taken as is, several are
//! narrowed to the one whose locality matches the target area.
//!
//! Coordinates are returned raw; [`BoundingBox::sanitize`] is applied by the
//! caller.

pub mod address;
pub mod arcgis;
pub mod census;
pub mod geocodio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ticketstat_citation_models::GeoResult;
use ticketstat_retry::{RetryError, RetryPolicy, is_transient_http};

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// No usable candidate for the address.
    #[error("No geocode result for {address}: {reason}")]
    NotFound {
        /// The address that was looked up.
        address: String,
        /// Why nothing was returned.
        reason: String,
    },

    /// The provider is misconfigured.
    #[error("Geocoder configuration error: {message}")]
    Config {
        /// Description of what is missing.
        message: String,
    },
}

impl GeocodeError {
    /// Whether a lookup failing with this error should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => is_transient_http(e),
            Self::Parse { .. } => true,
            Self::NotFound { .. } | Self::Config { .. } => false,
        }
    }

    fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// One match returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The geocoded location.
    pub result: GeoResult,
    /// Administrative area used to disambiguate between several matches
    /// (county or city, depending on the provider).
    pub locality: Option<String>,
}

/// A geocoding backend.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Short identifier stored alongside results (e.g. `"geocodio"`).
    fn id(&self) -> &str;

    /// Looks up every candidate location for a one-line address.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] for transport failures and
    /// [`GeocodeError::Parse`] for malformed response bodies.
    async fn candidates(&self, address: &str) -> Result<Vec<Candidate>, GeocodeError>;
}

/// Picks the single acceptable candidate.
///
/// One candidate is accepted unconditionally. With several, the first
/// whose locality equals `locality` (ignoring case) wins; if none match,
/// the lookup is ambiguous and nothing is returned.
#[must_use]
pub fn select_candidate(candidates: Vec<Candidate>, locality: &str) -> Option<GeoResult> {
    if candidates.len() <= 1 {
        return candidates.into_iter().next().map(|c| c.result);
    }

    log::debug!(
        "{} candidates, disambiguating by locality {locality:?}",
        candidates.len()
    );

    candidates
        .into_iter()
        .find(|c| {
            c.locality
                .as_deref()
                .is_some_and(|l| l.trim().eq_ignore_ascii_case(locality.trim()))
        })
        .map(|c| c.result)
}

/// Latitude/longitude rectangle of the target region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lat: 39.1,
            max_lat: 39.4,
            min_lon: -76.8,
            max_lon: -76.5,
        }
    }
}

impl BoundingBox {
    /// Whether the point lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude)
            && (self.min_lon..=self.max_lon).contains(&longitude)
    }

    /// Nulls the coordinates of `geo` if they fall outside the box.
    ///
    /// Returns `true` if the coordinates were removed.
    pub fn sanitize(&self, geo: &mut GeoResult) -> bool {
        match (geo.latitude, geo.longitude) {
            (Some(lat), Some(lon)) if self.contains(lat, lon) => false,
            (None, None) => false,
            (lat, lon) => {
                log::warn!(
                    "Got lat/long from outside the target region for {}: {lat:?}/{lon:?}",
                    geo.resolved_address
                );
                geo.clear_coordinates();
                true
            }
        }
    }
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Geocodio REST API. Requires an API key.
    Geocodio {
        /// Endpoint URL (e.g. `"https://api.geocod.io/v1.6/geocode"`).
        base_url: String,
    },
    /// US Census Bureau geocoder.
    Census {
        /// API base URL (e.g. `"https://geocoding.geo.census.gov/geocoder"`).
        base_url: String,
        /// Benchmark name (e.g. `"Public_AR_Current"`).
        benchmark: String,
        /// Vintage name (e.g. `"Current_Current"`).
        vintage: String,
    },
    /// `ArcGIS` World `GeocodeServer`.
    Arcgis {
        /// `findAddressCandidates` endpoint URL.
        base_url: String,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Geocodio {
            base_url: geocodio::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Geocoder section of the ingest configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retry policy for lookups that fail transiently.
    pub retry: RetryPolicy,
    /// Which provider to use.
    pub provider: ProviderConfig,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            retry: RetryPolicy::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl GeocoderConfig {
    /// Builds the HTTP client shared by provider requests.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the client cannot be constructed.
    pub fn http_client(&self) -> Result<reqwest::Client, GeocodeError> {
        Ok(reqwest::Client::builder()
            .user_agent("ticketstat/1.0")
            .timeout(std::time::Duration::from_secs(self.request_timeout_secs))
            .build()?)
    }
}

/// Builds the configured provider.
///
/// # Errors
///
/// Returns [`GeocodeError::Config`] if the provider needs an API key and
/// none was given.
pub fn build_provider(
    config: &ProviderConfig,
    client: reqwest::Client,
    api_key: Option<String>,
) -> Result<Box<dyn GeocodingProvider>, GeocodeError> {
    Ok(match config {
        ProviderConfig::Geocodio { base_url } => {
            let api_key =
                api_key
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| GeocodeError::Config {
                        message: "the geocodio provider requires an API key".to_string(),
                    })?;
            Box::new(geocodio::GeocodioProvider::new(client, base_url, &api_key))
        }
        ProviderConfig::Census {
            base_url,
            benchmark,
            vintage,
        } => Box::new(census::CensusProvider::new(client, base_url, benchmark, vintage)),
        ProviderConfig::Arcgis { base_url } => Box::new(arcgis::ArcgisProvider::new(client, base_url)),
    })
}

/// Resolves addresses through a provider with retries and disambiguation.
pub struct Geocoder {
    provider: Box<dyn GeocodingProvider>,
    retry: RetryPolicy,
    locality: String,
}

impl Geocoder {
    /// Creates a geocoder that prefers candidates located in `locality`.
    #[must_use]
    pub fn new(provider: Box<dyn GeocodingProvider>, retry: RetryPolicy, locality: &str) -> Self {
        Self {
            provider,
            retry,
            locality: locality.to_string(),
        }
    }

    /// Identifier of the underlying provider.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Resolves one address to a location.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::NotFound`] when there are no candidates, the
    /// candidates are ambiguous, the chosen candidate has no coordinates,
    /// or every attempt failed transiently. Non-transient provider errors
    /// are returned as is.
    pub async fn resolve(&self, address: &str) -> Result<GeoResult, GeocodeError> {
        log::debug!("Geocoding {address} via {}", self.provider.id());

        let label = format!("geocode {address}");
        let candidates = match self
            .retry
            .execute(
                &label,
                || self.provider.candidates(address),
                GeocodeError::is_transient,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(RetryError::Exhausted { attempts, last }) => {
                return Err(GeocodeError::NotFound {
                    address: address.to_string(),
                    reason: format!("lookup failed {attempts} times ({last})"),
                });
            }
            Err(RetryError::Permanent(e)) => return Err(e),
        };

        let count = candidates.len();
        let not_found = |reason: String| GeocodeError::NotFound {
            address: address.to_string(),
            reason,
        };

        if count == 0 {
            return Err(not_found("no candidates".to_string()));
        }

        let result = select_candidate(candidates, &self.locality).ok_or_else(|| {
            not_found(format!(
                "{count} candidates, none in {}",
                self.locality
            ))
        })?;

        if !result.has_coordinates() {
            return Err(not_found("candidate has no coordinates".to_string()));
        }

        Ok(result)
    }
}

/// Reads a JSON value as a string, accepting numbers too.
fn json_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a JSON value as a float, accepting numeric strings too.
fn json_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn candidate(lat: f64, locality: &str) -> Candidate {
        Candidate {
            result: GeoResult {
                latitude: Some(lat),
                longitude: Some(-76.6),
                resolved_address: format!("somewhere in {locality}"),
                ..GeoResult::default()
            },
            locality: Some(locality.to_string()),
        }
    }

    /// Replays a fixed sequence of responses, one per call.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<Vec<Candidate>, GeocodeError>>>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<Result<Vec<Candidate>, GeocodeError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl GeocodingProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn candidates(&self, _address: &str) -> Result<Vec<Candidate>, GeocodeError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GeocodeError::parse("script exhausted")))
        }
    }

    fn geocoder(responses: Vec<Result<Vec<Candidate>, GeocodeError>>) -> Geocoder {
        Geocoder::new(
            Box::new(ScriptedProvider::new(responses)),
            RetryPolicy::new(3, std::time::Duration::from_millis(10), std::time::Duration::from_millis(20)),
            "Baltimore City",
        )
    }

    #[test]
    fn single_candidate_is_taken() {
        let picked = select_candidate(vec![candidate(39.2, "Anne Arundel County")], "Baltimore City");
        assert_eq!(picked.unwrap().latitude, Some(39.2));
    }

    #[test]
    fn multiple_candidates_prefer_matching_locality() {
        let picked = select_candidate(
            vec![
                candidate(39.4, "Baltimore County"),
                candidate(39.29, "baltimore city"),
            ],
            "Baltimore City",
        );
        assert_eq!(picked.unwrap().latitude, Some(39.29));
    }

    #[test]
    fn ambiguous_candidates_yield_nothing() {
        let picked = select_candidate(
            vec![candidate(39.4, "Baltimore County"), candidate(38.9, "Howard County")],
            "Baltimore City",
        );
        assert!(picked.is_none());
        assert!(select_candidate(Vec::new(), "Baltimore City").is_none());
    }

    #[test]
    fn bounding_box_nulls_out_of_region() {
        let mut geo = GeoResult {
            latitude: Some(40.0),
            longitude: Some(-76.6),
            resolved_address: "1 Main St, Elsewhere".to_string(),
            zip: Some("17401".to_string()),
            ..GeoResult::default()
        };
        assert!(BoundingBox::default().sanitize(&mut geo));
        assert!(!geo.has_coordinates());
        assert_eq!(geo.zip.as_deref(), Some("17401"));
    }

    #[test]
    fn bounding_box_keeps_in_region() {
        let mut geo = GeoResult {
            latitude: Some(39.29),
            longitude: Some(-76.61),
            ..GeoResult::default()
        };
        assert!(!BoundingBox::default().sanitize(&mut geo));
        assert_eq!(geo.latitude, Some(39.29));
    }

    #[test]
    fn bounding_box_checks_longitude() {
        let bbox = BoundingBox::default();
        assert!(!bbox.contains(39.29, -76.4));
        assert!(!bbox.contains(39.29, -76.9));
        assert!(bbox.contains(39.1, -76.8));
    }

    #[test]
    fn provider_config_parses_tagged_toml() {
        let config: GeocoderConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 10

            [provider]
            type = "census"
            base_url = "https://geocoding.geo.census.gov/geocoder"
            benchmark = "Public_AR_Current"
            vintage = "Current_Current"
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(matches!(config.provider, ProviderConfig::Census { .. }));
    }

    #[test]
    fn geocodio_requires_api_key() {
        let result = build_provider(&ProviderConfig::default(), reqwest::Client::new(), None);
        assert!(matches!(result, Err(GeocodeError::Config { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_retries_malformed_bodies() {
        let geocoder = geocoder(vec![
            Err(GeocodeError::parse("truncated")),
            Ok(vec![candidate(39.29, "Baltimore City")]),
        ]);
        let result = geocoder.resolve("400 NORTH CHARLES ST").await.unwrap();
        assert_eq!(result.latitude, Some(39.29));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_gives_not_found_after_repeated_failures() {
        let geocoder = geocoder(vec![
            Err(GeocodeError::parse("truncated")),
            Err(GeocodeError::parse("truncated")),
            Err(GeocodeError::parse("truncated")),
        ]);
        let err = geocoder.resolve("400 NORTH CHARLES ST").await.unwrap_err();
        assert!(matches!(err, GeocodeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_with_no_candidates_is_not_found() {
        let err = geocoder(vec![Ok(Vec::new())]).resolve("1 NOWHERE").await.unwrap_err();
        assert!(matches!(err, GeocodeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_without_coordinates_is_not_found() {
        let geocoder = geocoder(vec![Ok(vec![Candidate {
            result: GeoResult::default(),
            locality: None,
        }])]);
        let err = geocoder.resolve("1 NOWHERE").await.unwrap_err();
        assert!(matches!(err, GeocodeError::NotFound { .. }));
    }
}
