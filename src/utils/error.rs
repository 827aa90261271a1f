//! Error types for the external data feeds
//!
//! A [`FetchError`] describes why a single HTTP retrieval failed; a
//! [`SourceError`] pins that failure to the feed it came from.

use std::fmt;

use thiserror::Error;

/// Errors that can occur while retrieving one external feed
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (DNS, connection refused, TLS, reset)
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Non-success HTTP status
    #[error("unexpected status {0}")]
    Status(u16),

    /// Request exceeded the connect or overall timeout
    #[error("request timed out")]
    Timeout,

    /// Response body could not be decoded into the expected shape
    #[error("malformed response: {0}")]
    Decode(String),

    /// Upstream answered but reported a failure in its payload
    #[error("upstream rejected request: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Short, machine-stable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status(_) => "status",
            Self::Timeout => "timeout",
            Self::Decode(_) => "decode",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(err)
        }
    }
}

/// The two external feeds a refresh depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFeed {
    Countries,
    ExchangeRates,
}

impl DataFeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Countries => "countries",
            Self::ExchangeRates => "exchange_rates",
        }
    }

    /// Human-readable label used in error details
    pub fn label(&self) -> &'static str {
        match self {
            Self::Countries => "Countries API",
            Self::ExchangeRates => "Exchange Rates API",
        }
    }
}

impl fmt::Display for DataFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetch failure attributed to the feed that produced it
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Could not fetch data from Countries API: {0}")]
    Countries(#[source] FetchError),

    #[error("Could not fetch data from Exchange Rates API: {0}")]
    ExchangeRates(#[source] FetchError),
}

impl SourceError {
    pub fn new(feed: DataFeed, cause: FetchError) -> Self {
        match feed {
            DataFeed::Countries => Self::Countries(cause),
            DataFeed::ExchangeRates => Self::ExchangeRates(cause),
        }
    }

    /// Which feed failed
    pub fn feed(&self) -> DataFeed {
        match self {
            Self::Countries(_) => DataFeed::Countries,
            Self::ExchangeRates(_) => DataFeed::ExchangeRates,
        }
    }

    /// The proximate cause of the failure
    pub fn cause(&self) -> &FetchError {
        match self {
            Self::Countries(e) | Self::ExchangeRates(e) => e,
        }
    }
}
