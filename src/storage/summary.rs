//! Summary artifact rendering with Handlebars template engine
//!
//! After every committed refresh a small SVG is written listing the total
//! country count, the top countries by estimated GDP and the refresh
//! timestamp. Rendering is best effort: callers log failures and move on.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::CountryRecord;
use crate::utils::{format_amount, truncate_text};

/// Default summary template
const DEFAULT_TEMPLATE: &str = include_str!("../../templates/summary.svg.hbs");

const TEMPLATE_NAME: &str = "summary";
const CANVAS_WIDTH: u32 = 640;
const BAR_MAX_WIDTH: f64 = 420.0;
const ROW_HEIGHT: u32 = 44;
const FIRST_ROW_Y: u32 = 160;
const MAX_NAME_CHARS: usize = 48;

/// Data the summary is rendered from, read after the refresh committed
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    pub total_countries: u64,

    /// Countries with a non-null estimated GDP, highest first
    pub top: Vec<CountryRecord>,

    pub last_refreshed_at: DateTime<Utc>,
}

/// Errors raised while producing the summary artifact
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("template rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("summary data unavailable: {0}")]
    Data(String),
}

/// Produces the summary artifact for a committed refresh
pub trait SummaryRenderer: Send + Sync {
    /// Render and store the artifact, returning where it was written
    fn render(&self, snapshot: &SummarySnapshot) -> Result<PathBuf, SummaryError>;

    /// Location the artifact is served from
    fn artifact_path(&self) -> &Path;
}

#[derive(Debug, Serialize)]
struct SummaryEntry {
    rank: usize,
    name: String,
    gdp: String,
    label_y: u32,
    bar_y: u32,
    bar_width: u32,
    value_x: u32,
    value_y: u32,
}

#[derive(Debug, Serialize)]
struct SummaryTemplateData {
    title: &'static str,
    width: u32,
    height: u32,
    total_countries: u64,
    last_refreshed_at: String,
    top_count: usize,
    entries: Vec<SummaryEntry>,
}

impl From<&SummarySnapshot> for SummaryTemplateData {
    fn from(snapshot: &SummarySnapshot) -> Self {
        let ranked: Vec<(&CountryRecord, f64)> = snapshot
            .top
            .iter()
            .filter_map(|r| r.estimated_gdp.map(|gdp| (r, gdp)))
            .collect();
        let max_gdp = ranked
            .iter()
            .map(|(_, gdp)| *gdp)
            .fold(0.0_f64, f64::max);

        let entries: Vec<SummaryEntry> = ranked
            .iter()
            .enumerate()
            .map(|(i, (record, gdp))| {
                let label_y = FIRST_ROW_Y + i as u32 * ROW_HEIGHT;
                let bar_width = if max_gdp > 0.0 {
                    ((gdp / max_gdp) * BAR_MAX_WIDTH).round().max(1.0) as u32
                } else {
                    1
                };
                SummaryEntry {
                    rank: i + 1,
                    name: truncate_text(&record.name, MAX_NAME_CHARS),
                    gdp: format_amount(*gdp),
                    label_y,
                    bar_y: label_y + 8,
                    bar_width,
                    value_x: 24 + bar_width + 8,
                    value_y: label_y + 17,
                }
            })
            .collect();

        let rows = entries.len().max(1) as u32;
        Self {
            title: "Country Summary",
            width: CANVAS_WIDTH,
            height: FIRST_ROW_Y + rows * ROW_HEIGHT,
            total_countries: snapshot.total_countries,
            last_refreshed_at: snapshot
                .last_refreshed_at
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string(),
            top_count: entries.len(),
            entries,
        }
    }
}

/// SVG summary renderer with Handlebars template engine
pub struct SvgSummaryRenderer {
    /// Handlebars template engine
    handlebars: Handlebars<'static>,

    /// Final artifact location
    output_path: PathBuf,
}

impl SvgSummaryRenderer {
    /// Create a writer with the built-in template
    ///
    /// The output directory is created lazily on first render.
    pub fn new(output_path: impl Into<PathBuf>) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        handlebars
            .register_template_string(TEMPLATE_NAME, DEFAULT_TEMPLATE)
            .context("Failed to register default summary template")?;

        Ok(Self {
            handlebars,
            output_path: output_path.into(),
        })
    }

    /// Create with custom template file
    pub fn with_template(output_path: impl Into<PathBuf>, template_path: &Path) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        handlebars
            .register_template_file(TEMPLATE_NAME, template_path)
            .context("Failed to register custom summary template")?;

        Ok(Self {
            handlebars,
            output_path: output_path.into(),
        })
    }

    /// Render the snapshot to an SVG string
    pub fn render_to_string(&self, snapshot: &SummarySnapshot) -> Result<String, SummaryError> {
        let data = SummaryTemplateData::from(snapshot);
        Ok(self.handlebars.render(TEMPLATE_NAME, &data)?)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> SummaryError {
        SummaryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl SummaryRenderer for SvgSummaryRenderer {
    fn render(&self, snapshot: &SummarySnapshot) -> Result<PathBuf, SummaryError> {
        let svg = self.render_to_string(snapshot)?;

        if let Some(dir) = self.output_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| self.io_error(dir, e))?;
            }
        }

        // Write to temp file first, then rename (atomic)
        let mut temp_name = self.output_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, svg).map_err(|e| self.io_error(&temp_path, e))?;
        fs::rename(&temp_path, &self.output_path)
            .map_err(|e| self.io_error(&self.output_path, e))?;

        tracing::debug!(path = %self.output_path.display(), "Summary written");
        Ok(self.output_path.clone())
    }

    fn artifact_path(&self) -> &Path {
        &self.output_path
    }
}
