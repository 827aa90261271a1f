//! Error types for the refresh pipeline

use thiserror::Error;

use crate::utils::error::SourceError;

/// Result type for refresh operations
pub type RefreshResult<T> = Result<T, RefreshError>;

/// Why a refresh attempt did not commit
///
/// None of these leave the store modified.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// Another refresh holds the single-flight guard
    #[error("A refresh is already in progress")]
    InProgress,

    /// One of the external feeds could not be retrieved
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),

    /// The store rejected the commit
    #[error("Failed to persist refresh: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl RefreshError {
    /// Whether a later attempt could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InProgress | Self::SourceUnavailable(_))
    }
}
