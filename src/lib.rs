//! meridian - Country metadata and exchange-rate refresh service
//!
//! Pulls country metadata and currency exchange rates from two external
//! feeds, merges them into per-country records with a randomized GDP
//! estimate, commits them atomically and serves them through a filterable
//! HTTP API plus a rendered summary image.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`sources`] - External feed fetching (countries, exchange rates)
//! - [`refresh`] - Reconciliation and the single-flight refresh coordinator
//! - [`storage`] - SQLite country store and summary artifact rendering
//! - [`server`] - axum HTTP API
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use meridian::config::Config;
//! use meridian::refresh::RefreshCoordinator;
//! use meridian::sources::HttpFetcher;
//! use meridian::storage::open_repository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let repo = open_repository(&config.database)?;
//!     let fetcher = HttpFetcher::new(&config.sources)?;
//!     let coordinator = RefreshCoordinator::new(repo, Arc::new(fetcher));
//!     let outcome = coordinator.refresh().await?;
//!     println!("{} countries", outcome.total_countries);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod refresh;
pub mod server;
pub mod sources;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, MeridianErrorTrait, Result};
    pub use crate::models::{CountryQuery, CountryRecord, RefreshStatus, SortOrder, StatusView};
    pub use crate::refresh::{RefreshCoordinator, RefreshError, RefreshOutcome, RefreshPhase};
    pub use crate::sources::{DataFetcher, HttpFetcher};
    pub use crate::storage::{CountryRepository, SharedCountryRepository, SummaryRenderer};
}

// Direct re-exports for convenience
pub use models::{CountryRecord, RefreshStatus};
