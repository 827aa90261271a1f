//! Persistence for country records and the summary artifact
//!
//! This module handles data persistence with SQLite for the country
//! records and refresh status, and the file-system summary image rendered
//! after each refresh.

pub mod repository;
pub mod summary;

use anyhow::Result;

use crate::config::DatabaseConfig;

pub use repository::{
    create_mock_repository, create_sqlite_repository, CountryRepository, MockCountryRepository,
    SharedCountryRepository, SqliteCountryRepository,
};
pub use summary::{SummaryError, SummaryRenderer, SummarySnapshot, SvgSummaryRenderer};

/// Open the configured SQLite store
pub fn open_repository(config: &DatabaseConfig) -> Result<SharedCountryRepository> {
    create_sqlite_repository(&config.sqlite_path)
}
