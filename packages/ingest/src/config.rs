//! Ingest configuration.
//!
//! The default configuration is embedded at compile time from
//! `config/default.toml`; `--config <path>` replaces it wholesale. Any key
//! a file leaves out falls back to the built-in default. Secrets never
//! come from the file, only from the environment (see [`Credentials`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ticketstat_geocoder::{BoundingBox, GeocoderConfig, ProviderConfig};
use ticketstat_portal::PortalConfig;
use ticketstat_retry::RetryPolicy;

use crate::IngestError;

/// Configuration embedded at compile time.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable holding the portal username.
pub const PORTAL_USERNAME_ENV: &str = "PORTAL_USERNAME";
/// Environment variable holding the portal password.
pub const PORTAL_PASSWORD_ENV: &str = "PORTAL_PASSWORD";
/// Environment variable holding the Geocodio API key.
pub const GEOCODIO_API_KEY_ENV: &str = "GEOCODIO_API_KEY";

/// Top-level ingest configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub portal: PortalSection,
    pub region: RegionConfig,
    pub geocoder: GeocoderConfig,
    pub storage: StorageConfig,
}

/// `[portal]`: endpoints plus the search retry policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSection {
    #[serde(flatten)]
    pub endpoints: PortalConfig,
    pub retry: RetryPolicy,
}

/// `[region]`: where citations are expected to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// City appended to every normalized address.
    pub city: String,
    /// State appended to every normalized address.
    pub region: String,
    /// Locality a geocoding candidate must match when there are several.
    pub county: String,
    /// Coordinates outside this box are nulled.
    pub bounding_box: BoundingBox,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            city: "Baltimore".to_string(),
            region: "Maryland".to_string(),
            county: "Baltimore City".to_string(),
            bounding_box: BoundingBox::default(),
        }
    }
}

/// `[storage]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory. `TICKETSTAT_DATA_DIR` takes precedence.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The data directory after applying the environment override.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        ticketstat_database::paths::resolve_data_dir(self.data_dir.as_deref())
    }
}

impl IngestConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ConfigParse`] if the document is invalid.
    pub fn from_toml(content: &str) -> Result<Self, IngestError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the file at `path`, or the embedded default when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be read, or
    /// [`IngestError::ConfigParse`] if it is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_toml(&std::fs::read_to_string(path)?)
            }
            None => Self::from_toml(DEFAULT_CONFIG),
        }
    }

    /// Whether the configured geocoding provider needs an API key.
    #[must_use]
    pub const fn needs_geocoder_key(&self) -> bool {
        matches!(self.geocoder.provider, ProviderConfig::Geocodio { .. })
    }
}

/// Portal login, read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Reads `PORTAL_USERNAME` and `PORTAL_PASSWORD`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if either is unset or empty.
    pub fn from_env() -> Result<Self, IngestError> {
        Ok(Self {
            username: required_env(PORTAL_USERNAME_ENV)?,
            password: required_env(PORTAL_PASSWORD_ENV)?,
        })
    }
}

/// Reads the Geocodio API key if the configured provider needs one.
///
/// # Errors
///
/// Returns [`IngestError::Config`] if the key is required but unset.
pub fn geocoder_api_key(config: &IngestConfig) -> Result<Option<String>, IngestError> {
    if config.needs_geocoder_key() {
        required_env(GEOCODIO_API_KEY_ENV).map(Some)
    } else {
        Ok(None)
    }
}

fn required_env(name: &str) -> Result<String, IngestError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IngestError::Config {
            message: format!("{name} is not set"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_matches_builtin_defaults() {
        let config = IngestConfig::load(None).unwrap();
        assert_eq!(config, IngestConfig::default());
    }

    #[test]
    fn default_targets_baltimore() {
        let config = IngestConfig::default();
        assert_eq!(config.region.city, "Baltimore");
        assert_eq!(config.region.county, "Baltimore City");
        assert!(config.needs_geocoder_key());
        assert_eq!(config.portal.retry.max_attempts, 7);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = IngestConfig::from_toml(
            r#"
            [portal]
            base_url = "https://portal.example"

            [portal.retry]
            max_attempts = 3

            [geocoder.provider]
            type = "arcgis"
            base_url = "https://arcgis.example/findAddressCandidates"

            [storage]
            data_dir = "/tmp/ticketstat"
            "#,
        )
        .unwrap();

        assert_eq!(config.portal.endpoints.base_url, "https://portal.example");
        assert_eq!(
            config.portal.endpoints.login_path,
            PortalConfig::default().login_path
        );
        assert_eq!(config.portal.retry.max_attempts, 3);
        assert_eq!(config.portal.retry.max_delay_ms, 10_000);
        assert!(!config.needs_geocoder_key());
        assert_eq!(config.region, RegionConfig::default());
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/ticketstat")));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = IngestConfig::from_toml("[geocoder.provider]\ntype = \"bing\"\n").unwrap_err();
        assert!(matches!(err, IngestError::ConfigParse(_)));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "officer".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
