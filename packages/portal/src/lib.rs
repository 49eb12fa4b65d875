#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the parking ticket portal.
//!
//! [`PortalClient::login`] posts credentials once and keeps the
//! authenticated cookie session for every later search. Searches request
//! the CSV export of the ticket list and are wrapped in a [`RetryPolicy`]:
//! network failures and responses without any ticket rows are treated as
//! transient, and a search that never yields rows ends in
//! [`PortalError::EmptyResult`] rather than a hard failure, since a day
//! with zero tickets is legitimate.
//!
//! Expired sessions are not renewed; construct a new client instead.

pub mod csv_export;
pub mod search;

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ticketstat_citation_models::RawCitationRow;
use ticketstat_retry::{RetryError, RetryPolicy, is_transient_http};

use crate::search::{SearchFilter, build_search_form};

/// Errors from portal operations.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// The portal rejected the credentials.
    #[error("Portal rejected the username or password")]
    Auth,

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The export body was not readable CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The export contained no row with a ticket number.
    #[error("Response contained no rows with a ticket number")]
    NoTicketRows,

    /// No citations could be retrieved for the search.
    #[error("No results: {reason}")]
    EmptyResult {
        /// Why nothing was returned.
        reason: String,
    },
}

impl PortalError {
    /// Whether a search failing with this error should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => is_transient_http(e),
            Self::Csv(_) | Self::NoTicketRows => true,
            Self::Auth | Self::EmptyResult { .. } => false,
        }
    }
}

/// Portal endpoints and behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Scheme and host of the portal.
    pub base_url: String,
    /// Path of the login form handler.
    pub login_path: String,
    /// Path of the ticket list search handler.
    pub search_path: String,
    /// Text the login response contains when credentials are rejected.
    pub login_failure_marker: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://baltimore.gtechna.net".to_string(),
            login_path: "/officercc/security/login.jsp".to_string(),
            search_path: "/officercc/seci/ticketList.jsp".to_string(),
            login_failure_marker: "Wrong User Name or Password".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl PortalConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

/// Returns `true` if a login response body signals rejected credentials.
#[must_use]
pub fn is_login_failure(body: &str, marker: &str) -> bool {
    !marker.is_empty() && body.contains(marker)
}

/// An authenticated portal session.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    config: PortalConfig,
    retry: RetryPolicy,
}

impl PortalClient {
    /// Logs in and returns a client bound to the authenticated session.
    ///
    /// Login is attempted exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Auth`] if the portal rejects the credentials,
    /// or [`PortalError::Http`] if the request itself fails.
    pub async fn login(
        config: PortalConfig,
        retry: RetryPolicy,
        username: &str,
        password: &str,
    ) -> Result<Self, PortalError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent("ticketstat/1.0")
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let url = config.url(&config.login_path);
        log::info!("Logging in to {url} as {username}");

        let body = client
            .post(&url)
            .form(&[
                ("bypassSso", "true"),
                ("login", username),
                ("password", password),
                ("language", "en"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if is_login_failure(&body, &config.login_failure_marker) {
            log::error!("Portal login rejected for {username}");
            return Err(PortalError::Auth);
        }

        log::info!("Portal login succeeded");

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// Runs a search with arbitrary predicates and returns every exported row.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::EmptyResult`] once the retry budget is spent
    /// without a valid result set, or the first non-transient error.
    pub async fn search(&self, filters: &[SearchFilter]) -> Result<Vec<RawCitationRow>, PortalError> {
        let form = build_search_form(filters);
        let url = self.config.url(&self.config.search_path);

        let result = self
            .retry
            .execute(
                "portal search",
                || self.fetch_export(&url, &form),
                PortalError::is_transient,
            )
            .await;

        match result {
            Ok(rows) => Ok(rows),
            Err(RetryError::Exhausted { attempts, last }) => Err(PortalError::EmptyResult {
                reason: format!("no valid result after {attempts} attempts ({last})"),
            }),
            Err(RetryError::Permanent(e)) => Err(e),
        }
    }

    /// All tickets with an infraction on `date`.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub async fn search_by_date(&self, date: NaiveDate) -> Result<Vec<RawCitationRow>, PortalError> {
        let rows = self.search(&[SearchFilter::infraction_date(date)]).await?;
        log::info!("Portal returned {} rows for {date}", rows.len());
        Ok(rows)
    }

    /// All tickets with an infraction between `start` and `end`, inclusive.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub async fn search_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawCitationRow>, PortalError> {
        let rows = self
            .search(&[SearchFilter::infraction_date_between(start, end)])
            .await?;
        log::info!("Portal returned {} rows for {start}..={end}", rows.len());
        Ok(rows)
    }

    async fn fetch_export(
        &self,
        url: &str,
        form: &[(&'static str, String)],
    ) -> Result<Vec<RawCitationRow>, PortalError> {
        let body = self
            .client
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        log::debug!("Search export: {} bytes", body.len());
        csv_export::parse_validated_export(&body)
    }
}
