//! Prometheus metrics for meridian
//!
//! This module provides metrics tracking for:
//! - Refresh pipeline: attempts by outcome, duration, stored country count
//! - HTTP API: requests by endpoint and status, request duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for refresh pipeline metrics
struct RefreshMetrics {
    attempts: CounterVec,
    duration: Histogram,
    countries: Gauge,
}

/// Container for HTTP API metrics
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

/// Global storage for refresh metrics
static REFRESH_METRICS: OnceLock<RefreshMetrics> = OnceLock::new();

/// Global storage for API metrics
static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Outcome label of a refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcomeLabel {
    Success,
    SourceUnavailable,
    InProgress,
    StorageFailure,
}

impl RefreshOutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SourceUnavailable => "source_unavailable",
            Self::InProgress => "in_progress",
            Self::StorageFailure => "storage_failure",
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = meridian::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Concurrent callers block here until the first registration finished
    let mut outcome = Ok(());
    METRICS_INIT_ATTEMPTED.get_or_init(|| {
        outcome = register_metrics();
        true
    });
    outcome
}

fn register_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let refresh = RefreshMetrics {
        attempts: register_counter_vec!(
            "meridian_refresh_total",
            "Refresh attempts by outcome",
            &["outcome"]
        )?,
        duration: register_histogram!(
            "meridian_refresh_duration_seconds",
            "Duration of refresh attempts that reached the fetch stage",
            vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
        )?,
        countries: register_gauge!(
            "meridian_countries",
            "Number of stored country records after the last commit"
        )?,
    };

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "meridian_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        duration: register_histogram_vec!(
            "meridian_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    REFRESH_METRICS
        .set(refresh)
        .map_err(|_| "Refresh metrics already initialized")?;
    API_METRICS
        .set(api)
        .map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    REFRESH_METRICS.get().is_some() && API_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of a refresh attempt
pub fn record_refresh(outcome: RefreshOutcomeLabel) {
    if let Some(m) = REFRESH_METRICS.get() {
        m.attempts.with_label_values(&[outcome.as_str()]).inc();
    }
}

/// Update the stored-country gauge
pub fn set_country_count(count: u64) {
    if let Some(m) = REFRESH_METRICS.get() {
        m.countries.set(count as f64);
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a refresh timer (returns a timer handle)
pub fn start_refresh_timer() -> MetricsTimer {
    match REFRESH_METRICS.get() {
        Some(m) => MetricsTimer::new(m.duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
