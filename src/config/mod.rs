//! Configuration management for meridian
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default countries feed
pub const DEFAULT_COUNTRIES_URL: &str =
    "https://restcountries.com/v2/all?fields=name,capital,region,population,flag,currencies";

/// Default exchange-rate feed (USD reference currency)
pub const DEFAULT_RATES_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// External feed configuration
    pub sources: SourcesConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Summary artifact configuration
    pub summary: SummaryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// External feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Countries dataset URL
    pub countries_url: String,

    /// Exchange-rate table URL
    pub rates_url: String,

    /// Overall request timeout in seconds
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds (must be shorter than the request timeout)
    pub connect_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

/// Summary artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Directory the rendered summary is written to
    pub output_dir: PathBuf,

    /// File name of the rendered summary
    pub file_name: String,

    /// Number of countries listed in the summary
    pub top_n: usize,

    /// Handlebars template overriding the built-in SVG layout
    #[serde(default)]
    pub template_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let countries_url = std::env::var("MERIDIAN_COUNTRIES_URL")
            .unwrap_or_else(|_| String::from(DEFAULT_COUNTRIES_URL));

        let rates_url =
            std::env::var("MERIDIAN_RATES_URL").unwrap_or_else(|_| String::from(DEFAULT_RATES_URL));

        let request_timeout_secs = std::env::var("MERIDIAN_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.sources.request_timeout_secs);

        let connect_timeout_secs = std::env::var("MERIDIAN_CONNECT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.sources.connect_timeout_secs);

        let user_agent = std::env::var("MERIDIAN_USER_AGENT")
            .unwrap_or_else(|_| format!("meridian/{}", env!("CARGO_PKG_VERSION")));

        let sqlite_path = std::env::var("MERIDIAN_SQLITE_PATH")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map(|v| PathBuf::from(v.trim_start_matches("sqlite://")))
            .unwrap_or(defaults.database.sqlite_path);

        let bind_address = match std::env::var("MERIDIAN_BIND_ADDRESS") {
            Ok(addr) => addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid MERIDIAN_BIND_ADDRESS: {addr}"))?,
            Err(_) => {
                let port = std::env::var("PORT")
                    .ok()
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(defaults.server.bind_address.port());
                SocketAddr::new(defaults.server.bind_address.ip(), port)
            }
        };

        let enable_cors = std::env::var("MERIDIAN_ENABLE_CORS")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(defaults.server.enable_cors);

        let output_dir = std::env::var("MERIDIAN_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.summary.output_dir);

        let top_n = std::env::var("MERIDIAN_SUMMARY_TOP_N")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.summary.top_n);

        let template_path = std::env::var("MERIDIAN_SUMMARY_TEMPLATE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let log_level = std::env::var("MERIDIAN_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("MERIDIAN_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            sources: SourcesConfig {
                countries_url,
                rates_url,
                request_timeout_secs,
                connect_timeout_secs,
                user_agent,
            },
            database: DatabaseConfig { sqlite_path },
            server: ServerConfig {
                bind_address,
                enable_cors,
                enable_request_logging: true,
            },
            summary: SummaryConfig {
                output_dir,
                file_name: defaults.summary.file_name,
                top_n,
                template_path,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sources.countries_url.trim().is_empty() {
            anyhow::bail!("countries_url must not be empty");
        }

        if self.sources.rates_url.trim().is_empty() {
            anyhow::bail!("rates_url must not be empty");
        }

        if self.sources.request_timeout_secs == 0 || self.sources.connect_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than 0");
        }

        if self.sources.connect_timeout_secs >= self.sources.request_timeout_secs {
            anyhow::bail!("connect_timeout_secs must be shorter than request_timeout_secs");
        }

        if self.summary.top_n == 0 {
            anyhow::bail!("summary top_n must be greater than 0");
        }

        if self.summary.file_name.trim().is_empty() {
            anyhow::bail!("summary file_name must not be empty");
        }

        Ok(())
    }
}

impl SourcesConfig {
    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SummaryConfig {
    /// Full path of the rendered summary
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: SourcesConfig {
                countries_url: String::from(DEFAULT_COUNTRIES_URL),
                rates_url: String::from(DEFAULT_RATES_URL),
                request_timeout_secs: 30,
                connect_timeout_secs: 10,
                user_agent: format!("meridian/{}", env!("CARGO_PKG_VERSION")),
            },
            database: DatabaseConfig {
                sqlite_path: PathBuf::from("data/meridian.db"),
            },
            server: ServerConfig {
                bind_address: SocketAddr::from(([0, 0, 0, 0], 8000)),
                enable_cors: true,
                enable_request_logging: true,
            },
            summary: SummaryConfig {
                output_dir: PathBuf::from("cache"),
                file_name: String::from("summary.svg"),
                top_n: 5,
                template_path: None,
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
