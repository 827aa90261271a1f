//! Repository Pattern for Country Storage
//!
//! This module provides the trait-based store the refresh pipeline and the
//! read API run against:
//! - [`SqliteCountryRepository`] for production use
//! - [`MockCountryRepository`] for tests, with commit-failure injection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Refresh Coordinator / HTTP handlers                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CountryRepository                          │
//! │   commit_refresh, find_by_name, list, delete_by_name, ...   │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                         │
//!                    ▼                         ▼
//!          ┌─────────────────┐       ┌─────────────────┐
//!          │     SQLite      │       │      Mock       │
//!          │  Implementation │       │ Implementation  │
//!          └─────────────────┘       └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use meridian::storage::repository::{CountryRepository, SqliteCountryRepository};
//!
//! let repo = SqliteCountryRepository::new("data/meridian.db")?;
//! let status = repo.status()?;
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use crate::models::{CountryQuery, CountryRecord, RefreshStatus, SortOrder};
use crate::refresh::reconcile::{ExistingIndex, ReconcilePlan, UpsertOp};
use crate::utils::name_key;

/// Builds the upsert plan from the identities read inside the commit
pub type PlanBuilder<'a> = dyn FnMut(&ExistingIndex) -> ReconcilePlan + 'a;

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistent keyed set of country records plus the refresh status singleton
pub trait CountryRepository: Send + Sync {
    /// Apply one refresh atomically
    ///
    /// Reads the existing identities, hands them to `build`, then applies
    /// every operation of the returned plan together with the status update
    /// in a single transaction. On any error nothing is changed.
    fn commit_refresh(&self, build: &mut PlanBuilder<'_>) -> Result<RefreshStatus>;

    /// Case-insensitive point lookup
    fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>>;

    /// List records matching the query's filters in the requested order
    fn list(&self, query: &CountryQuery) -> Result<Vec<CountryRecord>>;

    /// Records with a known estimated GDP, highest first
    fn top_by_gdp(&self, limit: usize) -> Result<Vec<CountryRecord>>;

    /// Delete by case-insensitive name; returns whether a record was removed
    ///
    /// A successful delete decrements the status count when a status exists.
    fn delete_by_name(&self, name: &str) -> Result<bool>;

    /// Refresh status, `None` before the first successful refresh
    fn status(&self) -> Result<Option<RefreshStatus>>;

    /// Number of stored records
    fn count(&self) -> Result<u64>;
}

/// Thread-safe shared repository wrapper
pub type SharedCountryRepository = Arc<dyn CountryRepository>;

// ============================================================================
// SQLite Implementation
// ============================================================================

const COLUMNS: &str = "id, name, capital, region, population, currency_code, \
                       exchange_rate, estimated_gdp, flag_url, last_refreshed_at";

/// SQLite implementation of CountryRepository
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteCountryRepository {
    conn: Mutex<Connection>,
}

impl SqliteCountryRepository {
    /// Create a new SQLite repository
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite repository initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    /// Create database schema
    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS countries (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    name_key TEXT NOT NULL UNIQUE,
                    capital TEXT,
                    region TEXT,
                    population INTEGER,
                    currency_code TEXT,
                    exchange_rate REAL,
                    estimated_gdp REAL,
                    flag_url TEXT,
                    last_refreshed_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_countries_region
                    ON countries(region);

                CREATE INDEX IF NOT EXISTS idx_countries_currency
                    ON countries(currency_code);

                CREATE TABLE IF NOT EXISTS refresh_status (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    total_countries INTEGER NOT NULL,
                    last_refreshed_at TEXT NOT NULL
                );
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    /// Read every stored identity plus the status timestamp
    fn load_index(conn: &Connection) -> Result<ExistingIndex> {
        let mut index = ExistingIndex::new();

        let mut stmt = conn
            .prepare("SELECT id, name, last_refreshed_at FROM countries")
            .context("Failed to prepare identity query")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                parse_timestamp(row, 2)?,
            ))
        })?;
        for entry in rows {
            let (id, name, at) = entry.context("Failed to read stored identity")?;
            index.insert(id, &name, at);
        }

        if let Some(status) = Self::read_status(conn)? {
            index.observe_refresh(status.last_refreshed_at);
        }

        Ok(index)
    }

    fn read_status(conn: &Connection) -> Result<Option<RefreshStatus>> {
        conn.query_row(
            "SELECT total_countries, last_refreshed_at FROM refresh_status WHERE id = 1",
            [],
            |row| {
                Ok(RefreshStatus {
                    total_countries: u64::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
                    last_refreshed_at: parse_timestamp(row, 1)?,
                })
            },
        )
        .optional()
        .context("Failed to read refresh status")
    }

    fn apply_operation(conn: &Connection, op: &UpsertOp) -> Result<()> {
        let fields = op.fields();
        let population = fields
            .population
            .map(i64::try_from)
            .transpose()
            .with_context(|| format!("Population out of range for {}", op.name()))?;
        let refreshed_at = op.refreshed_at().to_rfc3339();

        match op {
            UpsertOp::Insert { id, name, .. } => {
                conn.execute(
                    r#"
                    INSERT INTO countries (id, name, name_key, capital, region, population,
                        currency_code, exchange_rate, estimated_gdp, flag_url, last_refreshed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        id,
                        name,
                        name_key(name),
                        fields.capital,
                        fields.region,
                        population,
                        fields.currency_code,
                        fields.exchange_rate,
                        fields.estimated_gdp,
                        fields.flag_url,
                        refreshed_at,
                    ],
                )
                .with_context(|| format!("Failed to insert country {name}"))?;
            }
            UpsertOp::Update { id, name, .. } => {
                let changed = conn
                    .execute(
                        r#"
                        UPDATE countries SET
                            capital = ?2,
                            region = ?3,
                            population = ?4,
                            currency_code = ?5,
                            exchange_rate = ?6,
                            estimated_gdp = ?7,
                            flag_url = ?8,
                            last_refreshed_at = ?9
                        WHERE id = ?1
                        "#,
                        params![
                            id,
                            fields.capital,
                            fields.region,
                            population,
                            fields.currency_code,
                            fields.exchange_rate,
                            fields.estimated_gdp,
                            fields.flag_url,
                            refreshed_at,
                        ],
                    )
                    .with_context(|| format!("Failed to update country {name}"))?;

                if changed != 1 {
                    anyhow::bail!("Country {name} (id {id}) vanished during refresh");
                }
            }
        }

        Ok(())
    }

    fn order_clause(sort: Option<SortOrder>) -> &'static str {
        match sort {
            Some(SortOrder::GdpDesc) => "estimated_gdp IS NULL, estimated_gdp DESC, name_key",
            Some(SortOrder::GdpAsc) => "estimated_gdp IS NOT NULL, estimated_gdp ASC, name_key",
            Some(SortOrder::PopulationDesc) => "population IS NULL, population DESC, name_key",
            Some(SortOrder::PopulationAsc) => "population IS NOT NULL, population ASC, name_key",
            None => "name_key",
        }
    }
}

impl CountryRepository for SqliteCountryRepository {
    fn commit_refresh(&self, build: &mut PlanBuilder<'_>) -> Result<RefreshStatus> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin refresh transaction")?;

        let index = Self::load_index(&tx)?;
        let plan = build(&index);

        for op in &plan.operations {
            Self::apply_operation(&tx, op)?;
        }

        let total: i64 = tx
            .query_row("SELECT COUNT(*) FROM countries", [], |row| row.get(0))
            .context("Failed to count countries")?;

        tx.execute(
            r#"
            INSERT INTO refresh_status (id, total_countries, last_refreshed_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                total_countries = excluded.total_countries,
                last_refreshed_at = excluded.last_refreshed_at
            "#,
            params![total, plan.refreshed_at.to_rfc3339()],
        )
        .context("Failed to update refresh status")?;

        tx.commit().context("Failed to commit refresh transaction")?;

        Ok(RefreshStatus {
            total_countries: u64::try_from(total).unwrap_or(0),
            last_refreshed_at: plan.refreshed_at,
        })
    }

    fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM countries WHERE name_key = ?1"),
                params![name_key(name)],
                map_record,
            )
            .optional()
            .context("Failed to look up country")?;

        Ok(record)
    }

    fn list(&self, query: &CountryQuery) -> Result<Vec<CountryRecord>> {
        let conn = self.conn()?;

        let mut clauses = Vec::new();
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if let Some(region) = &query.region {
            args.push(region);
            clauses.push(format!("region = ?{}", args.len()));
        }
        if let Some(currency) = &query.currency {
            args.push(currency);
            clauses.push(format!("currency_code = ?{}", args.len()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM countries{where_clause} ORDER BY {}",
            Self::order_clause(query.sort)
        );

        let mut stmt = conn.prepare(&sql).context("Failed to prepare list query")?;
        let records = stmt
            .query_map(args.as_slice(), map_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list countries")?;

        Ok(records)
    }

    fn top_by_gdp(&self, limit: usize) -> Result<Vec<CountryRecord>> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM countries WHERE estimated_gdp IS NOT NULL \
             ORDER BY estimated_gdp DESC, name_key LIMIT ?1"
        ))?;
        let records = stmt
            .query_map(params![limit], map_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to query top countries")?;

        Ok(records)
    }

    fn delete_by_name(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin delete")?;

        let removed = tx
            .execute(
                "DELETE FROM countries WHERE name_key = ?1",
                params![name_key(name)],
            )
            .context("Failed to delete country")?;

        if removed == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE refresh_status SET total_countries = MAX(total_countries - ?1, 0) WHERE id = 1",
            params![removed as i64],
        )
        .context("Failed to update refresh status")?;

        tx.commit().context("Failed to commit delete")?;
        Ok(true)
    }

    fn status(&self) -> Result<Option<RefreshStatus>> {
        let conn = self.conn()?;
        Self::read_status(&conn)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM countries", [], |row| row.get(0))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<CountryRecord> {
    Ok(CountryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        capital: row.get(2)?,
        region: row.get(3)?,
        population: row
            .get::<_, Option<i64>>(4)?
            .and_then(|p| u64::try_from(p).ok()),
        currency_code: row.get(5)?,
        exchange_rate: row.get(6)?,
        estimated_gdp: row.get(7)?,
        flag_url: row.get(8)?,
        last_refreshed_at: parse_timestamp(row, 9)?,
    })
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

#[derive(Debug, Clone, Default)]
struct MockState {
    records: BTreeMap<i64, CountryRecord>,
    status: Option<RefreshStatus>,
}

/// In-memory mock implementation of CountryRepository
///
/// Commits are applied to a copy of the state and swapped in only when the
/// whole plan succeeded. `fail_commits` makes every commit fail without
/// touching state.
pub struct MockCountryRepository {
    state: RwLock<MockState>,
    fail_commits: AtomicBool,
}

impl MockCountryRepository {
    /// Create a new mock repository
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Make subsequent commits fail (or succeed again)
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every record, ordered by id
    pub fn records(&self) -> Vec<CountryRecord> {
        self.read().records.values().cloned().collect()
    }

    /// Get the number of records
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockCountryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl CountryRepository for MockCountryRepository {
    fn commit_refresh(&self, build: &mut PlanBuilder<'_>) -> Result<RefreshStatus> {
        let mut state = self.write();

        let mut index = ExistingIndex::from_records(state.records.values());
        if let Some(status) = state.status {
            index.observe_refresh(status.last_refreshed_at);
        }
        let plan = build(&index);

        if self.fail_commits.load(Ordering::SeqCst) {
            anyhow::bail!("injected commit failure");
        }

        let mut next = state.clone();
        for op in &plan.operations {
            if !op.is_insert() && !next.records.contains_key(&op.id()) {
                anyhow::bail!("Country {} (id {}) vanished during refresh", op.name(), op.id());
            }
            next.records.insert(op.id(), op.to_record());
        }

        let status = RefreshStatus {
            total_countries: next.records.len() as u64,
            last_refreshed_at: plan.refreshed_at,
        };
        next.status = Some(status);
        *state = next;

        Ok(status)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>> {
        let key = name_key(name);
        Ok(self
            .read()
            .records
            .values()
            .find(|r| name_key(&r.name) == key)
            .cloned())
    }

    fn list(&self, query: &CountryQuery) -> Result<Vec<CountryRecord>> {
        let mut records: Vec<CountryRecord> = self
            .read()
            .records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        sort_records(&mut records, query.sort);
        Ok(records)
    }

    fn top_by_gdp(&self, limit: usize) -> Result<Vec<CountryRecord>> {
        let mut records: Vec<CountryRecord> = self
            .read()
            .records
            .values()
            .filter(|r| r.estimated_gdp.is_some())
            .cloned()
            .collect();
        sort_records(&mut records, Some(SortOrder::GdpDesc));
        records.truncate(limit);
        Ok(records)
    }

    fn delete_by_name(&self, name: &str) -> Result<bool> {
        let key = name_key(name);
        let mut state = self.write();

        let Some(id) = state
            .records
            .values()
            .find(|r| name_key(&r.name) == key)
            .map(|r| r.id)
        else {
            return Ok(false);
        };

        state.records.remove(&id);
        if let Some(status) = state.status.as_mut() {
            status.total_countries = status.total_countries.saturating_sub(1);
        }
        Ok(true)
    }

    fn status(&self) -> Result<Option<RefreshStatus>> {
        Ok(self.read().status)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.read().records.len() as u64)
    }
}

/// Order records the way the SQLite implementation does
fn sort_records(records: &mut [CountryRecord], sort: Option<SortOrder>) {
    fn nulls<T: PartialOrd>(a: Option<T>, b: Option<T>, desc: bool) -> CmpOrdering {
        match (a, b) {
            (None, None) => CmpOrdering::Equal,
            // Nulls last when descending, first when ascending
            (None, Some(_)) => if desc { CmpOrdering::Greater } else { CmpOrdering::Less },
            (Some(_), None) => if desc { CmpOrdering::Less } else { CmpOrdering::Greater },
            (Some(x), Some(y)) => {
                let ord = x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal);
                if desc { ord.reverse() } else { ord }
            }
        }
    }

    records.sort_by(|a, b| {
        let primary = match sort {
            Some(SortOrder::GdpDesc) => nulls(a.estimated_gdp, b.estimated_gdp, true),
            Some(SortOrder::GdpAsc) => nulls(a.estimated_gdp, b.estimated_gdp, false),
            Some(SortOrder::PopulationDesc) => nulls(a.population, b.population, true),
            Some(SortOrder::PopulationAsc) => nulls(a.population, b.population, false),
            None => CmpOrdering::Equal,
        };
        primary.then_with(|| name_key(&a.name).cmp(&name_key(&b.name)))
    });
}

/// Create a shared SQLite repository
pub fn create_sqlite_repository(path: impl AsRef<Path>) -> Result<SharedCountryRepository> {
    let repo = SqliteCountryRepository::new(path)?;
    Ok(Arc::new(repo))
}

/// Create a shared mock repository
pub fn create_mock_repository() -> SharedCountryRepository {
    Arc::new(MockCountryRepository::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountrySourceRow, CurrencyEntry, RateTable};
    use crate::refresh::reconcile::reconcile;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    // Helper to create test repositories
    fn create_test_repos() -> Vec<Box<dyn CountryRepository>> {
        vec![
            Box::new(SqliteCountryRepository::in_memory().unwrap()),
            Box::new(MockCountryRepository::new()),
        ]
    }

    fn source_row(name: &str, region: &str, population: u64, code: &str) -> CountrySourceRow {
        CountrySourceRow {
            name: Some(name.to_string()),
            capital: None,
            region: Some(region.to_string()),
            population: Some(population),
            flag: None,
            currencies: Some(vec![CurrencyEntry {
                code: Some(code.to_string()),
                ..Default::default()
            }]),
        }
    }

    fn refresh(
        repo: &dyn CountryRepository,
        rows: &[CountrySourceRow],
        rates: &RateTable,
    ) -> RefreshStatus {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        repo.commit_refresh(&mut |index: &ExistingIndex| {
            reconcile(index, rows, rates, Utc::now(), &mut rng)
        })
        .unwrap()
    }

    fn sample() -> (Vec<CountrySourceRow>, RateTable) {
        let rows = vec![
            source_row("Arcadia", "Europe", 1_000_000, "ARC"),
            source_row("Borduria", "Europe", 5_000_000, "BOR"),
            source_row("Carpania", "Asia", 300_000, "CAR"),
            source_row("Syldavia", "Europe", 2_000_000, "NONE"),
        ];
        let rates: RateTable = [("ARC", 2.0), ("BOR", 0.5), ("CAR", 10.0)]
            .into_iter()
            .collect();
        (rows, rates)
    }

    #[test]
    fn test_empty_store() {
        for repo in create_test_repos() {
            assert!(repo.status().unwrap().is_none());
            assert!(repo.find_by_name("Arcadia").unwrap().is_none());
            assert!(repo.list(&CountryQuery::default()).unwrap().is_empty());
            assert!(!repo.delete_by_name("Arcadia").unwrap());
            assert!(repo.status().unwrap().is_none());
        }
    }

    #[test]
    fn test_commit_refresh_inserts_and_sets_status() {
        for repo in create_test_repos() {
            let (rows, rates) = sample();
            let status = refresh(repo.as_ref(), &rows, &rates);

            assert_eq!(status.total_countries, 4);
            assert_eq!(repo.status().unwrap(), Some(status));
            assert_eq!(repo.count().unwrap(), 4);

            let arcadia = repo.find_by_name("arcadia").unwrap().unwrap();
            assert_eq!(arcadia.name, "Arcadia");
            assert_eq!(arcadia.exchange_rate, Some(2.0));
            assert_eq!(arcadia.last_refreshed_at, status.last_refreshed_at);
            let gdp = arcadia.estimated_gdp.unwrap();
            assert!((500_000_000.0..1_000_000_000.0).contains(&gdp));

            let syldavia = repo.find_by_name("SYLDAVIA").unwrap().unwrap();
            assert!(syldavia.exchange_rate.is_none());
            assert!(syldavia.estimated_gdp.is_none());
        }
    }

    #[test]
    fn test_second_refresh_updates_in_place() {
        for repo in create_test_repos() {
            let (rows, rates) = sample();
            let first = refresh(repo.as_ref(), &rows, &rates);
            let before = repo.find_by_name("Arcadia").unwrap().unwrap();

            let rows = vec![source_row("ARCADIA", "Europe", 3_000_000, "ARC")];
            let second = refresh(repo.as_ref(), &rows, &rates);

            let after = repo.find_by_name("Arcadia").unwrap().unwrap();
            assert_eq!(after.id, before.id);
            assert_eq!(after.name, "Arcadia");
            assert_eq!(after.population, Some(3_000_000));
            assert!(after.last_refreshed_at >= before.last_refreshed_at);
            assert_eq!(second.total_countries, first.total_countries);
            assert!(second.last_refreshed_at >= first.last_refreshed_at);
        }
    }

    #[test]
    fn test_failed_plan_rolls_back() {
        let repo = SqliteCountryRepository::in_memory().unwrap();
        let (rows, rates) = sample();
        let before = refresh(&repo, &rows, &rates);

        // An update pointing at an id that does not exist aborts the commit
        let result = repo.commit_refresh(&mut |index: &ExistingIndex| {
            let mut rng = ChaCha8Rng::seed_from_u64(2);
            let mut plan = reconcile(index, &rows, &rates, Utc::now(), &mut rng);
            plan.operations.push(UpsertOp::Update {
                id: 9_999,
                name: "Ghost".to_string(),
                fields: Default::default(),
                refreshed_at: Utc::now(),
            });
            plan
        });

        assert!(result.is_err());
        assert_eq!(repo.status().unwrap(), Some(before));
        assert_eq!(repo.count().unwrap(), 4);
    }

    #[test]
    fn test_mock_injected_failure_leaves_state() {
        let repo = MockCountryRepository::new();
        let (rows, rates) = sample();
        refresh(&repo, &rows, &rates);
        let records = repo.records();
        let status = repo.status().unwrap();

        repo.fail_commits(true);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let result = repo.commit_refresh(&mut |index: &ExistingIndex| {
            reconcile(index, &rows, &rates, Utc::now(), &mut rng)
        });

        assert!(result.is_err());
        assert_eq!(repo.records(), records);
        assert_eq!(repo.status().unwrap(), status);
    }

    #[test]
    fn test_list_filters() {
        for repo in create_test_repos() {
            let (rows, rates) = sample();
            refresh(repo.as_ref(), &rows, &rates);

            let europe = repo
                .list(&CountryQuery::default().with_region("Europe"))
                .unwrap();
            assert_eq!(europe.len(), 3);

            let arc = repo
                .list(&CountryQuery::default().with_currency("ARC"))
                .unwrap();
            assert_eq!(arc.len(), 1);
            assert_eq!(arc[0].name, "Arcadia");

            let none = repo
                .list(&CountryQuery::default().with_region("Asia").with_currency("ARC"))
                .unwrap();
            assert!(none.is_empty());

            let all = repo.list(&CountryQuery::default()).unwrap();
            let names: Vec<_> = all.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["Arcadia", "Borduria", "Carpania", "Syldavia"]);
        }
    }

    #[test]
    fn test_list_sort_nulls_placement() {
        for repo in create_test_repos() {
            let (rows, rates) = sample();
            refresh(repo.as_ref(), &rows, &rates);

            let desc = repo
                .list(&CountryQuery::default().sorted(SortOrder::GdpDesc))
                .unwrap();
            assert_eq!(desc.last().unwrap().name, "Syldavia");
            assert!(desc
                .windows(2)
                .take(2)
                .all(|w| w[0].estimated_gdp >= w[1].estimated_gdp));

            let asc = repo
                .list(&CountryQuery::default().sorted(SortOrder::GdpAsc))
                .unwrap();
            assert_eq!(asc.first().unwrap().name, "Syldavia");

            let pop = repo
                .list(&CountryQuery::default().sorted(SortOrder::PopulationDesc))
                .unwrap();
            let names: Vec<_> = pop.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["Borduria", "Syldavia", "Arcadia", "Carpania"]);
        }
    }

    #[test]
    fn test_top_by_gdp_skips_nulls() {
        for repo in create_test_repos() {
            let (rows, rates) = sample();
            refresh(repo.as_ref(), &rows, &rates);

            let top = repo.top_by_gdp(5).unwrap();
            assert_eq!(top.len(), 3);
            assert!(top.iter().all(|r| r.estimated_gdp.is_some()));
            // Borduria: 5M people at rate 0.5 dominates any multiplier draw
            assert_eq!(top[0].name, "Borduria");

            assert_eq!(repo.top_by_gdp(1).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_delete_decrements_status() {
        for repo in create_test_repos() {
            let (rows, rates) = sample();
            let status = refresh(repo.as_ref(), &rows, &rates);

            assert!(repo.delete_by_name("carpania").unwrap());
            assert!(repo.find_by_name("Carpania").unwrap().is_none());

            let after = repo.status().unwrap().unwrap();
            assert_eq!(after.total_countries, status.total_countries - 1);
            assert_eq!(after.last_refreshed_at, status.last_refreshed_at);

            assert!(!repo.delete_by_name("Carpania").unwrap());
            assert_eq!(repo.status().unwrap(), Some(after));
        }
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("meridian.db");
        let (rows, rates) = sample();

        {
            let repo = SqliteCountryRepository::new(&path).unwrap();
            refresh(&repo, &rows, &rates);
        }

        let repo = SqliteCountryRepository::new(&path).unwrap();
        assert_eq!(repo.count().unwrap(), 4);
        assert_eq!(repo.status().unwrap().unwrap().total_countries, 4);
    }

    #[test]
    fn test_shared_repository_creation() {
        let repo = create_mock_repository();
        assert_eq!(repo.count().unwrap(), 0);
    }
}
