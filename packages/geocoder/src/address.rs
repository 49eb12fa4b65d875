//! Address normalization for portal citation locations.
//!
//! The portal splits a ticket's location into a civic number, a compass
//! direction and a street name. These are folded into one uppercase,
//! city-qualified query string that doubles as the geocode cache key:
//!
//! - The civic number is coarsened to its block (`742` → `700`, anything
//!   below 100 or missing → `1`), so exact house numbers are never
//!   geocoded.
//! - Direction abbreviations are spelled out (`N` → `NORTH`).
//! - `LOT` / `ALLEY` tokens are dropped from the street.
//!
//! Normalization is a pure function of its inputs.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Whole-word `LOT` / `ALLEY` tokens.
static NOISE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:LOT|ALLEY)\b").unwrap_or_else(|_| unreachable!()));

/// Runs of whitespace.
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap_or_else(|_| unreachable!()));

/// A direction abbreviation at the start of a street name (`"N CHARLES ST"`,
/// `"S. BROADWAY"`).
static LEADING_DIRECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(N|S|E|W|NE|NW|SE|SW)\.?\s+(.+)$").unwrap_or_else(|_| unreachable!()));

/// Leading digits of a civic number (`"415A"` → `"415"`).
static CIVIC_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+").unwrap_or_else(|_| unreachable!()));

/// Canonical street address used as both geocoding query and cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedAddress {
    /// Block number the civic number was rounded to.
    pub block: u32,
    /// Expanded direction word, if any.
    pub direction: Option<String>,
    /// Cleaned street name. Empty when the row has no usable location.
    pub street: String,
    query: String,
}

impl NormalizedAddress {
    /// The full query string, e.g. `"400 NORTH CHARLES ST, BALTIMORE, MARYLAND"`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.query
    }

    /// Whether the address has a street to geocode.
    #[must_use]
    pub const fn is_locatable(&self) -> bool {
        !self.street.is_empty()
    }
}

impl fmt::Display for NormalizedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query)
    }
}

/// Builds [`NormalizedAddress`] values qualified with a fixed city and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressNormalizer {
    city: String,
    region: String,
}

impl AddressNormalizer {
    /// Creates a normalizer that appends `, {city}, {region}` to every address.
    #[must_use]
    pub fn new(city: &str, region: &str) -> Self {
        Self {
            city: city.trim().to_uppercase(),
            region: region.trim().to_uppercase(),
        }
    }

    /// Normalizes a civic number, direction and street into one address.
    #[must_use]
    pub fn normalize(&self, civic_number: &str, direction: &str, street: &str) -> NormalizedAddress {
        let block = block_number(civic_number);

        let mut direction = expand_direction(direction);
        let mut street = clean_street(street);

        if direction.is_none()
            && let Some(caps) = LEADING_DIRECTION_RE.captures(&street)
        {
            direction = expand_direction(&caps[1]);
            street = caps[2].to_string();
        }

        let query = match &direction {
            Some(dir) => format!("{block} {dir} {street}, {}, {}", self.city, self.region),
            None => format!("{block} {street}, {}, {}", self.city, self.region),
        };

        NormalizedAddress {
            block,
            direction,
            street,
            query,
        }
    }
}

/// Rounds a civic number down to its block.
///
/// Missing, unparsable and sub-100 numbers map to block `1`.
#[must_use]
pub fn block_number(civic_number: &str) -> u32 {
    CIVIC_DIGITS_RE
        .find(civic_number.trim())
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n >= 100)
        .map_or(1, |n| n / 100 * 100)
}

/// Spells out a compass direction abbreviation. Unknown values are kept
/// uppercased; blank input yields `None`.
#[must_use]
pub fn expand_direction(direction: &str) -> Option<String> {
    let upper = direction.trim().trim_end_matches('.').to_uppercase();

    let expanded = match upper.as_str() {
        "" => return None,
        "N" => "NORTH",
        "S" => "SOUTH",
        "E" => "EAST",
        "W" => "WEST",
        "NE" => "NORTHEAST",
        "NW" => "NORTHWEST",
        "SE" => "SOUTHEAST",
        "SW" => "SOUTHWEST",
        other => other,
    };

    Some(expanded.to_string())
}

/// Uppercases a street name, drops `LOT` / `ALLEY` tokens and collapses
/// whitespace.
#[must_use]
pub fn clean_street(street: &str) -> String {
    let upper = street.to_uppercase();
    let stripped = NOISE_TOKEN_RE.replace_all(&upper, " ");
    WHITESPACE_RE.replace_all(stripped.trim(), " ").into_owned()
}
