//! Unified error handling for the meridian crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`MeridianErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Machine-stable classification surfaced to API callers
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use meridian::error::{Error, ErrorCategory, MeridianErrorTrait};
//!
//! fn describe(err: &Error) -> (String, String) {
//!     (err.category().code().to_string(), err.public_detail())
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::refresh::error::RefreshError;
pub use crate::storage::summary::SummaryError;
pub use crate::utils::error::{DataFeed, FetchError, SourceError};

/// Common trait for meridian error types
pub trait MeridianErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a retry could succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;

    /// Human-readable detail safe to show to API callers
    fn public_detail(&self) -> String;
}

/// Classification of errors as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// An external feed failed; nothing was written
    SourceUnavailable,
    /// Another refresh holds the single-flight guard
    RefreshInProgress,
    /// Persistence or other server-side failure
    Internal,
    /// No record matched
    NotFound,
    /// Malformed request parameters
    InvalidRequest,
    /// Configuration and validation errors
    Config,
    /// No summary artifact has been rendered yet
    SummaryUnavailable,
}

impl ErrorCategory {
    /// Machine-stable code used in error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::RefreshInProgress => "refresh_in_progress",
            Self::Internal => "internal_error",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::Config => "config_error",
            Self::SummaryUnavailable => "summary_unavailable",
        }
    }

    /// HTTP status the category is reported with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SourceUnavailable => 503,
            Self::RefreshInProgress => 409,
            Self::Internal | Self::Config => 500,
            Self::NotFound | Self::SummaryUnavailable => 404,
            Self::InvalidRequest => 400,
        }
    }
}

/// Unified error type for the meridian crate
#[derive(Error, Debug)]
pub enum Error {
    /// Refresh pipeline errors
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Point lookup or delete found no record
    #[error("Country not found: {name}")]
    NotFound { name: String },

    /// Invalid query parameter
    #[error("Invalid request: {0}")]
    InvalidQuery(String),

    /// No summary artifact exists yet
    #[error("Summary image not found")]
    SummaryMissing,

    /// Storage errors raised with context
    #[error("Storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MeridianErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Refresh(e) => e.is_retryable(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::NotFound { .. }
            | Self::InvalidQuery(_)
            | Self::SummaryMissing
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Refresh(RefreshError::InProgress) => ErrorCategory::RefreshInProgress,
            Self::Refresh(RefreshError::SourceUnavailable(_)) => ErrorCategory::SourceUnavailable,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidQuery(_) => ErrorCategory::InvalidRequest,
            Self::SummaryMissing => ErrorCategory::SummaryUnavailable,
            Self::Config(_) => ErrorCategory::Config,
            Self::Refresh(RefreshError::Persistence(_))
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Other { .. } => ErrorCategory::Internal,
        }
    }

    fn public_detail(&self) -> String {
        match self {
            Self::NotFound { .. } => "Country not found".to_string(),
            Self::Refresh(RefreshError::InProgress)
            | Self::Refresh(RefreshError::SourceUnavailable(_))
            | Self::InvalidQuery(_)
            | Self::SummaryMissing
            | Self::Config(_) => self.to_string(),
            // Storage internals never reach callers
            _ => "Internal server error".to_string(),
        }
    }
}

impl Error {
    /// Create a not-found error for a country name
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
