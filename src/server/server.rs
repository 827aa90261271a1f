//! HTTP server implementation
//!
//! This module wires the store, the feed fetcher, the summary renderer and
//! the refresh coordinator into the shared application state and serves the
//! API router.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig};
use crate::refresh::RefreshCoordinator;
use crate::sources::HttpFetcher;
use crate::storage::{self, SharedCountryRepository, SvgSummaryRenderer};

use super::api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Country store
    pub repo: SharedCountryRepository,

    /// Single-flight refresh pipeline
    pub refresher: Arc<RefreshCoordinator>,

    /// Where the summary artifact is served from
    pub summary_path: PathBuf,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Assemble state from already-built components
    pub fn new(refresher: Arc<RefreshCoordinator>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            repo: Arc::clone(refresher.repository()),
            refresher,
            summary_path: summary_path.into(),
            start_time: Instant::now(),
        }
    }

    /// Build the production components described by `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let repo = storage::open_repository(&config.database)?;
        let fetcher = HttpFetcher::new(&config.sources).context("Failed to build HTTP client")?;
        let summary_path = config.summary.artifact_path();
        let renderer = match &config.summary.template_path {
            Some(template) => SvgSummaryRenderer::with_template(&summary_path, template)?,
            None => SvgSummaryRenderer::new(&summary_path)?,
        };

        let refresher = RefreshCoordinator::new(repo, Arc::new(fetcher))
            .with_renderer(Arc::new(renderer), config.summary.top_n);

        Ok(Self::new(Arc::new(refresher), summary_path))
    }
}

// ============================================================================
// Server
// ============================================================================

/// Main API server
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a server from the full configuration
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let state =
            AppState::from_config(config).map_err(|e| ServerError::InitError(format!("{e:#}")))?;

        Ok(Self {
            config: config.server.clone(),
            state,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!(%addr, "Starting API server");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("API server shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            summary_path: self.state.summary_path.clone(),
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub summary_path: PathBuf,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Meridian Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Summary: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.summary_path.display(),
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.database.sqlite_path = dir.path().join("meridian.db");
        config.summary.output_dir = dir.path().join("cache");
        config
    }

    #[test]
    fn test_server_creation() {
        let dir = TempDir::new().unwrap();
        let server = Server::new(&test_config(&dir));
        assert!(server.is_ok());
    }

    #[test]
    fn test_server_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.sources.connect_timeout_secs = config.sources.request_timeout_secs;

        match Server::new(&config) {
            Err(ServerError::ConfigError(_)) => {}
            other => panic!("Expected config error, got: {:?}", other.err()),
        }
    }

    #[test]
    fn test_server_info() {
        let dir = TempDir::new().unwrap();
        let server = Server::new(&test_config(&dir)).unwrap();
        let info = server.info();

        assert!(info.cors_enabled);
        assert_eq!(info.summary_path, dir.path().join("cache").join("summary.svg"));
        assert!(info.display().contains("Bind Address: 0.0.0.0:8000"));
    }

    #[tokio::test]
    async fn test_app_state_starts_empty() {
        let dir = TempDir::new().unwrap();
        let server = Server::new(&test_config(&dir)).unwrap();
        let state = server.state();

        assert!(state.repo.status().unwrap().is_none());
        assert!(!state.refresher.is_busy());
    }
}
