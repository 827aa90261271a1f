//! HTTP fetcher for the countries and exchange-rate feeds
//!
//! Both feeds are retrieved concurrently with a bounded connect and overall
//! timeout. There is no retry: a failed retrieval ends the refresh attempt
//! and is reported against the feed that produced it.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    Client,
};
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::models::{CountrySourceRow, RateTable, RatesPayload, SourceBatch};
use crate::utils::error::{DataFeed, FetchError, SourceError};

use super::DataFetcher;

/// Fetcher for the two external feeds over HTTP
pub struct HttpFetcher {
    /// HTTP client with configured timeouts
    client: Client,

    /// Countries dataset URL
    countries_url: String,

    /// Exchange-rate table URL
    rates_url: String,
}

impl HttpFetcher {
    /// Create a fetcher from the sources configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Transport` if the HTTP client cannot be created
    pub fn new(config: &SourcesConfig) -> Result<Self, FetchError> {
        Self::with_timeouts(
            &config.countries_url,
            &config.rates_url,
            config.connect_timeout(),
            config.request_timeout(),
            &config.user_agent,
        )
    }

    /// Create a fetcher with explicit URLs and timeouts
    ///
    /// # Arguments
    ///
    /// * `countries_url` - Countries dataset URL
    /// * `rates_url` - Exchange-rate table URL
    /// * `connect_timeout` - Timeout for establishing a connection
    /// * `timeout` - Timeout for the whole request
    /// * `user_agent` - User-Agent header value
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Transport` if the HTTP client cannot be created
    pub fn with_timeouts(
        countries_url: &str,
        rates_url: &str,
        connect_timeout: Duration,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .gzip(true)
            .default_headers(Self::build_headers(user_agent))
            .build()
            .map_err(FetchError::Transport)?;

        Ok(Self {
            client,
            countries_url: countries_url.to_string(),
            rates_url: rates_url.to_string(),
        })
    }

    /// Fetch and decode the countries feed
    ///
    /// Entries that are not JSON objects of the expected shape are skipped;
    /// a body that is not a JSON array fails the whole feed.
    pub async fn fetch_countries(&self) -> Result<Vec<CountrySourceRow>, FetchError> {
        let body = self.get_bytes(&self.countries_url).await?;
        decode_countries(&body)
    }

    /// Fetch and decode the exchange-rate feed
    pub async fn fetch_rates(&self) -> Result<RateTable, FetchError> {
        let body = self.get_bytes(&self.rates_url).await?;
        decode_rates(&body)
    }

    /// Issue one GET and return the body of a successful response
    async fn get_bytes(&self, url: &str) -> Result<bytes::Bytes, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?)
    }

    /// Build default headers for feed requests
    fn build_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        headers
    }
}

#[async_trait]
impl DataFetcher for HttpFetcher {
    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        let (countries, rates) = tokio::join!(self.fetch_countries(), self.fetch_rates());

        // Countries are reported first when both feeds fail.
        let countries = countries.map_err(|e| SourceError::new(DataFeed::Countries, e))?;
        let rates = rates.map_err(|e| SourceError::new(DataFeed::ExchangeRates, e))?;

        tracing::debug!(
            countries = countries.len(),
            rates = rates.len(),
            "Fetched external feeds"
        );

        Ok(SourceBatch { countries, rates })
    }
}

/// Decode the countries feed body
pub fn decode_countries(body: &[u8]) -> Result<Vec<CountrySourceRow>, FetchError> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| FetchError::Decode(format!("countries body is not a JSON array: {e}")))?;

    let total = entries.len();
    let rows: Vec<CountrySourceRow> = entries
        .into_iter()
        .filter(serde_json::Value::is_object)
        .filter_map(|entry| serde_json::from_value::<CountrySourceRow>(entry).ok())
        .filter(|row| row.name.as_deref().is_some_and(|n| !n.trim().is_empty()))
        .collect();

    if rows.len() < total {
        tracing::warn!(
            skipped = total - rows.len(),
            "Skipped country entries without a usable name"
        );
    }

    Ok(rows)
}

/// Decode the exchange-rate feed body
pub fn decode_rates(body: &[u8]) -> Result<RateTable, FetchError> {
    let payload: RatesPayload = serde_json::from_slice(body)
        .map_err(|e| FetchError::Decode(format!("rates body is malformed: {e}")))?;

    match payload.result.as_deref() {
        Some("success") | None => {}
        Some(other) => {
            let reason = payload.error_type.unwrap_or_else(|| other.to_string());
            return Err(FetchError::Rejected(reason));
        }
    }

    let mut table = RateTable::new(payload.rates);
    table.base = payload.base_code;
    Ok(table)
}
