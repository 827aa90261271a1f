//! External data feeds
//!
//! The refresh pipeline depends on two independent datasets: the countries
//! feed and the exchange-rate table. [`DataFetcher`] is the seam between the
//! pipeline and the network; [`HttpFetcher`] is the production
//! implementation and [`StaticFetcher`] serves fixed data for tests and
//! offline runs.

pub mod fetcher;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::SourceBatch;
use crate::utils::error::{DataFeed, FetchError, SourceError};

pub use fetcher::HttpFetcher;

/// Retrieves both datasets of a refresh
///
/// Either both feeds are returned or the failing feed is reported; partial
/// data never leaves the fetcher.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self) -> Result<SourceBatch, SourceError>;
}

// ============================================================================
// Static Implementation (for testing)
// ============================================================================

/// How a [`StaticFetcher`] should fail
#[derive(Debug, Clone, PartialEq)]
pub enum FailureMode {
    Status(u16),
    Timeout,
    Rejected(String),
}

impl FailureMode {
    fn to_error(&self) -> FetchError {
        match self {
            Self::Status(code) => FetchError::Status(*code),
            Self::Timeout => FetchError::Timeout,
            Self::Rejected(reason) => FetchError::Rejected(reason.clone()),
        }
    }
}

/// In-memory fetcher returning a fixed batch or a scripted failure
pub struct StaticFetcher {
    batch: Mutex<SourceBatch>,
    failure: Mutex<Option<(DataFeed, FailureMode)>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    /// Create a fetcher that always returns `batch`
    pub fn new(batch: SourceBatch) -> Self {
        Self {
            batch: Mutex::new(batch),
            failure: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Delay every fetch, keeping a refresh in flight for a while
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every subsequent fetch on `feed`
    pub fn with_failure(self, feed: DataFeed, mode: FailureMode) -> Self {
        self.set_failure(Some((feed, mode)));
        self
    }

    /// Replace the batch served by subsequent fetches
    pub fn set_batch(&self, batch: SourceBatch) {
        *self.batch.lock().unwrap_or_else(|e| e.into_inner()) = batch;
    }

    /// Change or clear the scripted failure
    pub fn set_failure(&self, failure: Option<(DataFeed, FailureMode)>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = failure;
    }

    /// Number of fetches performed so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataFetcher for StaticFetcher {
    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some((feed, mode)) = failure {
            return Err(SourceError::new(feed, mode.to_error()));
        }

        Ok(self.batch.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountrySourceRow, RateTable};

    fn sample_batch() -> SourceBatch {
        SourceBatch {
            countries: vec![CountrySourceRow {
                name: Some("Arcadia".to_string()),
                ..Default::default()
            }],
            rates: RateTable::default(),
        }
    }

    #[tokio::test]
    async fn test_static_fetcher_returns_batch() {
        let fetcher = StaticFetcher::new(sample_batch());
        let batch = fetcher.fetch().await.unwrap();
        assert_eq!(batch.countries.len(), 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_static_fetcher_failure() {
        let fetcher = StaticFetcher::new(sample_batch())
            .with_failure(DataFeed::ExchangeRates, FailureMode::Timeout);

        let err = fetcher.fetch().await.unwrap_err();
        assert_eq!(err.feed(), DataFeed::ExchangeRates);
        assert!(matches!(err.cause(), FetchError::Timeout));

        fetcher.set_failure(None);
        assert!(fetcher.fetch().await.is_ok());
        assert_eq!(fetcher.calls(), 2);
    }
}
