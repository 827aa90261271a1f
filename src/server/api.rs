//! REST API handlers
//!
//! This module defines the API routes and handlers for the country service.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCategory, MeridianErrorTrait};
use crate::metrics;
use crate::models::{CountryQuery, SortOrder, StatusView};
use crate::storage::CountryRepository;

use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-stable category code
    pub error: String,
    /// Human-readable detail
    pub details: String,
}

impl ErrorResponse {
    pub fn new(category: ErrorCategory, details: impl Into<String>) -> Self {
        Self {
            error: category.code().to_string(),
            details: details.into(),
        }
    }
}

/// Successful refresh response
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub message: String,
    pub total_countries: u64,
    pub last_refreshed_at: DateTime<Utc>,
}

/// Plain message response
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub refresh_phase: String,
}

/// Service description returned at the root
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub name: &'static str,
    pub route: &'static str,
}

const ENDPOINTS: &[(&str, &str)] = &[
    ("refresh", "POST /countries/refresh"),
    ("get_all", "GET /countries"),
    ("get_one", "GET /countries/{name}"),
    ("delete", "DELETE /countries/{name}"),
    ("status", "GET /status"),
    ("image", "GET /countries/image"),
    ("health", "GET /health"),
    ("metrics", "GET /metrics"),
];

/// Query parameters of the list endpoint
#[derive(Debug, Default, Deserialize)]
pub struct CountriesParams {
    pub region: Option<String>,
    pub currency: Option<String>,
    pub sort: Option<String>,
}

impl TryFrom<CountriesParams> for CountryQuery {
    type Error = Error;

    fn try_from(params: CountriesParams) -> Result<Self, Self::Error> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let sort = match present(params.sort) {
            Some(raw) => Some(SortOrder::parse(&raw).ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "unknown sort '{raw}', expected one of gdp_desc, gdp_asc, pop_desc, pop_asc"
                ))
            })?),
            None => None,
        };

        Ok(CountryQuery {
            region: present(params.region),
            currency: present(params.currency),
            sort,
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let category = self.category();
        if category == ErrorCategory::Internal {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, code = category.code(), "Request rejected");
        }

        let status =
            StatusCode::from_u16(category.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::new(category, self.public_detail()))).into_response()
    }
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(get_status))
        // Country endpoints; the static routes take priority over `{name}`
        .route("/countries", get(list_countries))
        .route("/countries/refresh", post(refresh_countries))
        .route("/countries/image", get(summary_image))
        .route("/countries/{name}", get(get_country).delete(delete_country))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Record request count and latency per matched route
async fn track_metrics(req: Request, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| String::from("unmatched"));
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Service Handlers
// ============================================================================

async fn root() -> impl IntoResponse {
    Json(ServiceInfo {
        message: String::from("Meridian country data service"),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: ENDPOINTS
            .iter()
            .map(|&(name, route)| EndpointInfo { name, route })
            .collect(),
    })
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        refresh_phase: state.refresher.phase().to_string(),
    })
}

async fn metrics_handler() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => Error::other(format!("Failed to encode metrics: {e}")).into_response(),
    }
}

/// Run a store call on the blocking pool
async fn with_repo<T, F>(state: &AppState, f: F) -> Result<T, Error>
where
    F: FnOnce(&dyn CountryRepository) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let repo = Arc::clone(&state.repo);
    tokio::task::spawn_blocking(move || f(repo.as_ref()))
        .await
        .map_err(|e| Error::other(format!("Store task failed: {e}")))?
        .map_err(Error::from)
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusView>, Error> {
    let status = with_repo(&state, |repo| repo.status()).await?;
    Ok(Json(StatusView::from(status)))
}

// ============================================================================
// Country Handlers
// ============================================================================

/// Run a refresh
async fn refresh_countries(State(state): State<AppState>) -> Result<Json<RefreshResponse>, Error> {
    let outcome = state.refresher.refresh().await?;

    Ok(Json(RefreshResponse {
        message: String::from("Countries refreshed successfully"),
        total_countries: outcome.total_countries,
        last_refreshed_at: outcome.last_refreshed_at,
    }))
}

async fn list_countries(
    State(state): State<AppState>,
    Query(params): Query<CountriesParams>,
) -> Result<Response, Error> {
    let query = CountryQuery::try_from(params)?;
    let records = with_repo(&state, move |repo| repo.list(&query)).await?;
    Ok(Json(records).into_response())
}

async fn get_country(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, Error> {
    let key = name.clone();
    let record = with_repo(&state, move |repo| repo.find_by_name(&key))
        .await?
        .ok_or_else(|| Error::not_found(&name))?;
    Ok(Json(record).into_response())
}

async fn delete_country(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let key = name.clone();
    if !with_repo(&state, move |repo| repo.delete_by_name(&key)).await? {
        return Err(Error::not_found(name));
    }

    tracing::info!(country = %name, "Country deleted");
    Ok(Json(MessageResponse {
        message: format!("Country '{name}' deleted successfully"),
    }))
}

/// Serve the most recently rendered summary
async fn summary_image(State(state): State<AppState>) -> Result<Response, Error> {
    let body = match tokio::fs::read(&state.summary_path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::SummaryMissing),
        Err(e) => return Err(Error::Io(e)),
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/svg+xml")],
        body,
    )
        .into_response())
}
