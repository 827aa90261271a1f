// Core data structures for meridian

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Stored country row, one per distinct (case-insensitive) name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub id: i64,
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: Option<u64>,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>, // local currency per reference unit
    pub estimated_gdp: Option<f64>, // randomized proxy, not a real GDP figure
    pub flag_url: Option<String>,
    pub last_refreshed_at: DateTime<Utc>,
}

/// Process-wide refresh bookkeeping (singleton row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub total_countries: u64,
    pub last_refreshed_at: DateTime<Utc>,
}

/// Status as reported to callers; zero/null before the first refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub total_countries: u64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl From<Option<RefreshStatus>> for StatusView {
    fn from(status: Option<RefreshStatus>) -> Self {
        match status {
            Some(s) => Self {
                total_countries: s.total_countries,
                last_refreshed_at: Some(s.last_refreshed_at),
            },
            None => Self::default(),
        }
    }
}

// ============================================================================
// External Feed Shapes
// ============================================================================

/// One entry of a country's currency list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyEntry {
    #[serde(deserialize_with = "lenient")]
    pub code: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub symbol: Option<String>,
}

/// A row of the countries feed with every field optional
///
/// A field holding a value of the wrong type decodes as `None` instead of
/// failing the row. Rows without a usable name are skipped during
/// reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountrySourceRow {
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub capital: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub region: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub population: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    pub flag: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub currencies: Option<Vec<CurrencyEntry>>,
}

/// Decode an optional field, mapping a value of the wrong type to `None`
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Non-negative whole number; integral floats such as `1000000.0` are accepted
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Number(n) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    }))
}

/// Array whose entries decode independently; undecodable entries are dropped
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    ))
}

impl CountrySourceRow {
    /// Code of the first listed currency, if any
    pub fn primary_currency_code(&self) -> Option<&str> {
        self.currencies
            .as_deref()
            .and_then(|list| list.first())
            .and_then(|c| c.code.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Exchange rates keyed by currency code, relative to one reference currency
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    pub base: Option<String>,
    pub rates: HashMap<String, f64>,
}

impl RateTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { base: None, rates }
    }

    pub fn get(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Body of the exchange-rate feed
#[derive(Debug, Clone, Deserialize)]
pub struct RatesPayload {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub base_code: Option<String>,
    #[serde(default)]
    pub rates: HashMap<String, f64>,
    #[serde(default, rename = "error-type")]
    pub error_type: Option<String>,
}

/// Both datasets of one refresh, fetched before any store mutation
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub countries: Vec<CountrySourceRow>,
    pub rates: RateTable,
}

// ============================================================================
// Read Queries
// ============================================================================

/// Ordering accepted by the list endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    GdpDesc,
    GdpAsc,
    PopulationDesc,
    PopulationAsc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GdpDesc => "gdp_desc",
            Self::GdpAsc => "gdp_asc",
            Self::PopulationDesc => "pop_desc",
            Self::PopulationAsc => "pop_asc",
        }
    }

    /// Parse from the query-string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gdp_desc" => Some(Self::GdpDesc),
            "gdp_asc" => Some(Self::GdpAsc),
            "pop_desc" | "population_desc" => Some(Self::PopulationDesc),
            "pop_asc" | "population_asc" => Some(Self::PopulationAsc),
            _ => None,
        }
    }
}

/// Filters and ordering for listing countries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryQuery {
    pub region: Option<String>,
    pub currency: Option<String>,
    pub sort: Option<SortOrder>,
}

impl CountryQuery {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Whether a record passes the equality filters
    pub fn matches(&self, record: &CountryRecord) -> bool {
        let region_ok = self
            .region
            .as_deref()
            .map_or(true, |r| record.region.as_deref() == Some(r));
        let currency_ok = self
            .currency
            .as_deref()
            .map_or(true, |c| record.currency_code.as_deref() == Some(c));
        region_ok && currency_ok
    }
}
