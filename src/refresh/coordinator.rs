//! Refresh coordinator
//!
//! Orchestrates one refresh: fetch both feeds, reconcile them against the
//! stored identities, commit everything in one transaction and finally
//! render the summary artifact.
//!
//! # Phases
//!
//! ```text
//! Idle ──▶ Fetching ──▶ Reconciling ──▶ Committing ──▶ Summarizing ──▶ Idle
//!              │                             │
//!              └──────── failure ────────────┴──────────────────────▶ Idle
//! ```
//!
//! Only one refresh runs at a time. A second caller is rejected with
//! [`RefreshError::InProgress`] instead of waiting. The pipeline runs on its
//! own task that owns the single-flight guard, so a caller that stops
//! waiting does not cut a refresh short or free the guard while a commit is
//! still running. Every exit path of that task (including panics) releases
//! the guard and returns the phase to `Idle`.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::metrics::{self, RefreshOutcomeLabel};
use crate::models::{RefreshStatus, SourceBatch};
use crate::sources::DataFetcher;
use crate::storage::{
    CountryRepository, SharedCountryRepository, SummaryError, SummaryRenderer, SummarySnapshot,
};

use super::error::{RefreshError, RefreshResult};
use super::reconcile::{reconcile, ExistingIndex};

/// Stage of the refresh pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    Fetching,
    Reconciling,
    Committing,
    Summarizing,
}

impl RefreshPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Reconciling => "reconciling",
            Self::Committing => "committing",
            Self::Summarizing => "summarizing",
        }
    }
}

impl std::fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a committed refresh
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RefreshOutcome {
    pub total_countries: u64,
    pub last_refreshed_at: DateTime<Utc>,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct PlanStats {
    inserted: usize,
    updated: usize,
    skipped: usize,
}

type SharedPhase = Arc<RwLock<RefreshPhase>>;

fn set_phase(phase: &SharedPhase, next: RefreshPhase) {
    let mut current = phase.write().unwrap_or_else(|e| e.into_inner());
    let from = *current;
    if from != next {
        tracing::debug!(from = %from, to = %next, "Refresh phase transition");
        *current = next;
    }
}

/// Returns the phase to `Idle` when the refresh scope ends
struct PhaseReset(SharedPhase);

impl Drop for PhaseReset {
    fn drop(&mut self) {
        set_phase(&self.0, RefreshPhase::Idle);
    }
}

/// Everything one refresh run needs, cloned into the refresh task
#[derive(Clone)]
struct Pipeline {
    repo: SharedCountryRepository,
    fetcher: Arc<dyn DataFetcher>,
    renderer: Option<Arc<dyn SummaryRenderer>>,
    top_n: usize,
    rng: Arc<Mutex<ChaCha8Rng>>,
    phase: SharedPhase,
}

/// Single-flight orchestrator of the refresh pipeline
pub struct RefreshCoordinator {
    pipeline: Pipeline,
    flight: Arc<tokio::sync::Mutex<()>>,
}

impl RefreshCoordinator {
    /// Default number of countries in the summary
    pub const DEFAULT_TOP_N: usize = 5;

    /// Create a coordinator with an entropy-seeded multiplier RNG and no summary
    pub fn new(repo: SharedCountryRepository, fetcher: Arc<dyn DataFetcher>) -> Self {
        Self {
            pipeline: Pipeline {
                repo,
                fetcher,
                renderer: None,
                top_n: Self::DEFAULT_TOP_N,
                rng: Arc::new(Mutex::new(ChaCha8Rng::from_entropy())),
                phase: Arc::new(RwLock::new(RefreshPhase::Idle)),
            },
            flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Render a summary of the top `top_n` countries after each commit
    pub fn with_renderer(mut self, renderer: Arc<dyn SummaryRenderer>, top_n: usize) -> Self {
        self.pipeline.renderer = Some(renderer);
        self.pipeline.top_n = top_n;
        self
    }

    /// Seed the GDP multiplier RNG for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.pipeline.rng = Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed)));
        self
    }

    /// Current pipeline phase
    pub fn phase(&self) -> RefreshPhase {
        *self.pipeline.phase.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a refresh is in flight
    pub fn is_busy(&self) -> bool {
        self.phase() != RefreshPhase::Idle
    }

    /// The store this coordinator commits into
    pub fn repository(&self) -> &SharedCountryRepository {
        &self.pipeline.repo
    }

    /// Run one refresh
    ///
    /// The refresh continues to completion even if the returned future is
    /// dropped.
    ///
    /// # Errors
    ///
    /// - [`RefreshError::InProgress`] if another refresh is running
    /// - [`RefreshError::SourceUnavailable`] if either feed failed; nothing was written
    /// - [`RefreshError::Persistence`] if the commit failed; the transaction was rolled back
    ///
    /// A summary failure after the commit is logged and does not affect the result.
    pub async fn refresh(&self) -> RefreshResult<RefreshOutcome> {
        let Ok(flight) = Arc::clone(&self.flight).try_lock_owned() else {
            tracing::info!("Refresh rejected: another refresh is in progress");
            metrics::record_refresh(RefreshOutcomeLabel::InProgress);
            return Err(RefreshError::InProgress);
        };
        set_phase(&self.pipeline.phase, RefreshPhase::Fetching);
        let reset = PhaseReset(Arc::clone(&self.pipeline.phase));
        let pipeline = self.pipeline.clone();

        let task = tokio::spawn(async move {
            // Dropped in reverse order: the phase goes Idle before the guard frees
            let _flight = flight;
            let _reset = reset;
            pipeline.run().await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Refresh task failed");
                metrics::record_refresh(RefreshOutcomeLabel::StorageFailure);
                Err(RefreshError::Persistence(anyhow::anyhow!(
                    "refresh task failed: {e}"
                )))
            }
        }
    }
}

impl Pipeline {
    async fn run(self) -> RefreshResult<RefreshOutcome> {
        let _timer = metrics::start_refresh_timer();
        let started = Instant::now();

        let batch = match self.fetcher.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(
                    feed = %e.feed(),
                    kind = e.cause().kind(),
                    error = %e,
                    "Refresh aborted: external feed unavailable"
                );
                metrics::record_refresh(RefreshOutcomeLabel::SourceUnavailable);
                return Err(e.into());
            }
        };
        tracing::debug!(
            countries = batch.countries.len(),
            rates = batch.rates.len(),
            "Feeds fetched"
        );

        set_phase(&self.phase, RefreshPhase::Reconciling);
        let (status, stats) = match self.commit(batch).await {
            Ok(committed) => committed,
            Err(e) => {
                tracing::error!(error = ?e, "Refresh commit failed, transaction rolled back");
                metrics::record_refresh(RefreshOutcomeLabel::StorageFailure);
                return Err(RefreshError::Persistence(e));
            }
        };

        metrics::record_refresh(RefreshOutcomeLabel::Success);
        metrics::set_country_count(status.total_countries);
        tracing::info!(
            total = status.total_countries,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh committed"
        );

        if let Some(renderer) = self.renderer.clone() {
            set_phase(&self.phase, RefreshPhase::Summarizing);
            self.summarize(renderer, status).await;
        }

        Ok(RefreshOutcome {
            total_countries: status.total_countries,
            last_refreshed_at: status.last_refreshed_at,
            inserted: stats.inserted,
            updated: stats.updated,
            skipped: stats.skipped,
        })
    }

    /// Reconcile and commit on the blocking pool
    async fn commit(
        &self,
        batch: SourceBatch,
    ) -> anyhow::Result<(RefreshStatus, PlanStats)> {
        let repo = Arc::clone(&self.repo);
        let rng = Arc::clone(&self.rng);
        let phase = Arc::clone(&self.phase);

        tokio::task::spawn_blocking(move || {
            let mut rng = rng.lock().unwrap_or_else(|e| e.into_inner());
            let mut stats = PlanStats::default();

            let status = repo.commit_refresh(&mut |existing: &ExistingIndex| {
                let plan = reconcile(existing, &batch.countries, &batch.rates, Utc::now(), &mut *rng);
                stats = PlanStats {
                    inserted: plan.inserted(),
                    updated: plan.updated(),
                    skipped: plan.skipped,
                };
                set_phase(&phase, RefreshPhase::Committing);
                plan
            })?;

            Ok::<_, anyhow::Error>((status, stats))
        })
        .await
        .map_err(|e| anyhow::anyhow!("commit task failed: {e}"))?
    }

    /// Read the top countries and render the summary on the blocking pool;
    /// failures are logged and swallowed
    async fn summarize(&self, renderer: Arc<dyn SummaryRenderer>, status: RefreshStatus) {
        let repo = Arc::clone(&self.repo);
        let top_n = self.top_n;

        let rendered = tokio::task::spawn_blocking(move || {
            let snapshot = snapshot(repo.as_ref(), top_n, status)?;
            renderer.render(&snapshot)
        })
        .await;

        match rendered {
            Ok(Ok(path)) => tracing::info!(path = %path.display(), "Summary rendered"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Summary rendering failed"),
            Err(e) => tracing::warn!(error = %e, "Summary rendering task panicked"),
        }
    }
}

/// Build the snapshot the summary is rendered from
fn snapshot(
    repo: &dyn CountryRepository,
    top_n: usize,
    status: RefreshStatus,
) -> Result<SummarySnapshot, SummaryError> {
    let top = repo
        .top_by_gdp(top_n)
        .map_err(|e| SummaryError::Data(format!("{e:#}")))?;

    Ok(SummarySnapshot {
        total_countries: status.total_countries,
        top,
        last_refreshed_at: status.last_refreshed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountrySourceRow, CurrencyEntry, RateTable};
    use crate::sources::{FailureMode, StaticFetcher};
    use crate::models::{CountryQuery, CountryRecord};
    use crate::storage::repository::PlanBuilder;
    use crate::storage::{MockCountryRepository, SvgSummaryRenderer};
    use crate::utils::error::DataFeed;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn batch() -> SourceBatch {
        SourceBatch {
            countries: vec![CountrySourceRow {
                name: Some("Arcadia".to_string()),
                population: Some(1_000_000),
                currencies: Some(vec![CurrencyEntry {
                    code: Some("ARC".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            rates: [("ARC", 2.0)].into_iter().collect::<RateTable>(),
        }
    }

    struct FailingRenderer;

    impl SummaryRenderer for FailingRenderer {
        fn render(&self, _snapshot: &SummarySnapshot) -> Result<PathBuf, SummaryError> {
            Err(SummaryError::Data("renderer offline".to_string()))
        }

        fn artifact_path(&self) -> &Path {
            Path::new("missing.svg")
        }
    }

    struct PanickingRenderer;

    impl SummaryRenderer for PanickingRenderer {
        fn render(&self, _snapshot: &SummarySnapshot) -> Result<PathBuf, SummaryError> {
            panic!("renderer exploded");
        }

        fn artifact_path(&self) -> &Path {
            Path::new("missing.svg")
        }
    }

    /// Store whose commits take a while, counting the applied ones
    struct SlowRepository {
        inner: MockCountryRepository,
        commits: AtomicUsize,
    }

    impl SlowRepository {
        fn new() -> Self {
            Self {
                inner: MockCountryRepository::new(),
                commits: AtomicUsize::new(0),
            }
        }
    }

    impl CountryRepository for SlowRepository {
        fn commit_refresh(&self, build: &mut PlanBuilder<'_>) -> anyhow::Result<RefreshStatus> {
            std::thread::sleep(Duration::from_millis(400));
            let status = self.inner.commit_refresh(build)?;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(status)
        }

        fn find_by_name(&self, name: &str) -> anyhow::Result<Option<CountryRecord>> {
            self.inner.find_by_name(name)
        }

        fn list(&self, query: &CountryQuery) -> anyhow::Result<Vec<CountryRecord>> {
            self.inner.list(query)
        }

        fn top_by_gdp(&self, limit: usize) -> anyhow::Result<Vec<CountryRecord>> {
            self.inner.top_by_gdp(limit)
        }

        fn delete_by_name(&self, name: &str) -> anyhow::Result<bool> {
            self.inner.delete_by_name(name)
        }

        fn status(&self) -> anyhow::Result<Option<RefreshStatus>> {
            self.inner.status()
        }

        fn count(&self) -> anyhow::Result<u64> {
            self.inner.count()
        }
    }

    #[tokio::test]
    async fn test_refresh_commits_batch() {
        let repo = Arc::new(MockCountryRepository::new());
        let coordinator =
            RefreshCoordinator::new(repo.clone(), Arc::new(StaticFetcher::new(batch()))).with_seed(11);

        let outcome = coordinator.refresh().await.unwrap();
        assert_eq!(outcome.total_countries, 1);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);

        let status = repo.status().unwrap().unwrap();
        assert_eq!(status.last_refreshed_at, outcome.last_refreshed_at);
    }

    #[tokio::test]
    async fn test_source_failure_leaves_store_untouched() {
        let repo = Arc::new(MockCountryRepository::new());
        let fetcher = Arc::new(StaticFetcher::new(batch()));
        let coordinator = RefreshCoordinator::new(repo.clone(), fetcher.clone());
        coordinator.refresh().await.unwrap();
        let before = (repo.records(), repo.status().unwrap());

        fetcher.set_failure(Some((DataFeed::ExchangeRates, FailureMode::Status(503))));
        match coordinator.refresh().await {
            Err(RefreshError::SourceUnavailable(e)) => assert_eq!(e.feed(), DataFeed::ExchangeRates),
            other => panic!("Expected source failure, got: {:?}", other),
        }

        assert_eq!((repo.records(), repo.status().unwrap()), before);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn test_commit_failure_is_persistence_error() {
        let repo = Arc::new(MockCountryRepository::new());
        repo.fail_commits(true);
        let coordinator = RefreshCoordinator::new(repo.clone(), Arc::new(StaticFetcher::new(batch())));

        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, RefreshError::Persistence(_)));
        assert!(repo.is_empty());
        assert!(repo.status().unwrap().is_none());
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_rejected() {
        let repo = Arc::new(MockCountryRepository::new());
        let fetcher =
            Arc::new(StaticFetcher::new(batch()).with_delay(Duration::from_millis(300)));
        let coordinator = Arc::new(RefreshCoordinator::new(repo.clone(), fetcher.clone()));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(coordinator.is_busy());
        assert_eq!(coordinator.phase(), RefreshPhase::Fetching);
        assert!(matches!(
            coordinator.refresh().await,
            Err(RefreshError::InProgress)
        ));

        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.total_countries, 1);
        assert_eq!(fetcher.calls(), 1);
        assert!(!coordinator.is_busy());

        // The guard is free again once the first refresh finished
        assert!(coordinator.refresh().await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_caller_keeps_guard_until_commit_ends() {
        let repo = Arc::new(SlowRepository::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            repo.clone(),
            Arc::new(StaticFetcher::new(batch())),
        ));

        let caller = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // The commit is still running on its own task
        assert!(coordinator.is_busy());
        assert!(matches!(
            coordinator.refresh().await,
            Err(RefreshError::InProgress)
        ));

        for _ in 0..100 {
            if !coordinator.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!coordinator.is_busy());
        assert_eq!(repo.commits.load(Ordering::SeqCst), 1);
        assert_eq!(repo.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_failure_is_swallowed() {
        let repo = Arc::new(MockCountryRepository::new());
        let fetcher = Arc::new(StaticFetcher::new(batch()));

        let failing = RefreshCoordinator::new(repo.clone(), fetcher.clone())
            .with_renderer(Arc::new(FailingRenderer), 5);
        assert!(failing.refresh().await.is_ok());

        let panicking = RefreshCoordinator::new(repo.clone(), fetcher)
            .with_renderer(Arc::new(PanickingRenderer), 5);
        assert!(panicking.refresh().await.is_ok());
        assert_eq!(panicking.phase(), RefreshPhase::Idle);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_is_written_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.svg");
        let repo = Arc::new(MockCountryRepository::new());
        let coordinator = RefreshCoordinator::new(repo, Arc::new(StaticFetcher::new(batch())))
            .with_renderer(Arc::new(SvgSummaryRenderer::new(&path).unwrap()), 5);

        coordinator.refresh().await.unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("Total countries: 1"));
        assert!(svg.contains("1. Arcadia"));
    }

    #[tokio::test]
    async fn test_seeded_coordinators_agree() {
        let run = |seed| async move {
            let repo = Arc::new(MockCountryRepository::new());
            let coordinator =
                RefreshCoordinator::new(repo.clone(), Arc::new(StaticFetcher::new(batch())))
                    .with_seed(seed);
            coordinator.refresh().await.unwrap();
            repo.records()[0].estimated_gdp
        };

        assert_eq!(run(5).await, run(5).await);
    }
}
