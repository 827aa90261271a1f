//! Record reconciliation
//!
//! Turns the two fetched datasets into an ordered list of upsert operations
//! against the identities already in the store. The computation is pure
//! apart from the GDP multiplier, which is drawn from a caller-supplied RNG,
//! and the `now` timestamp, which is passed in.
//!
//! # Estimated GDP
//!
//! `estimated_gdp = population * m / exchange_rate` where `m` is drawn
//! uniformly from `[1000, 2000)` independently for every row. The value is a
//! randomized proxy and differs between refreshes of identical data; tests
//! assert ranges, never exact values.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::{CountryRecord, CountrySourceRow, RateTable};
use crate::utils::{name_key, non_blank};

/// Lower bound (inclusive) of the GDP multiplier
pub const MULTIPLIER_MIN: f64 = 1000.0;

/// Upper bound (exclusive) of the GDP multiplier
pub const MULTIPLIER_MAX: f64 = 2000.0;

// ============================================================================
// Existing Identities
// ============================================================================

/// A stored identity as seen by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingEntry {
    pub id: i64,
    pub name: String,
    pub last_refreshed_at: DateTime<Utc>,
}

/// Identities present in the store, keyed by normalized name
///
/// Read inside the commit transaction so reconciliation sees a consistent
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct ExistingIndex {
    entries: HashMap<String, ExistingEntry>,
    max_id: i64,
    latest_refresh: Option<DateTime<Utc>>,
}

impl ExistingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from full records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CountryRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record.id, &record.name, record.last_refreshed_at);
        }
        index
    }

    /// Register one stored identity
    pub fn insert(&mut self, id: i64, name: &str, last_refreshed_at: DateTime<Utc>) {
        self.max_id = self.max_id.max(id);
        self.observe_refresh(last_refreshed_at);
        self.entries.insert(
            name_key(name),
            ExistingEntry {
                id,
                name: name.to_string(),
                last_refreshed_at,
            },
        );
    }

    /// Account for a refresh timestamp not tied to a record (the status row)
    pub fn observe_refresh(&mut self, at: DateTime<Utc>) {
        self.latest_refresh = Some(self.latest_refresh.map_or(at, |prev| prev.max(at)));
    }

    /// Look up an identity by any casing of its name
    pub fn get(&self, name: &str) -> Option<&ExistingEntry> {
        self.entries.get(&name_key(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest identity assigned so far
    pub fn max_id(&self) -> i64 {
        self.max_id
    }

    /// Latest refresh timestamp seen on any record or the status row
    pub fn latest_refresh(&self) -> Option<DateTime<Utc>> {
        self.latest_refresh
    }
}

// ============================================================================
// Upsert Operations
// ============================================================================

/// Fields extracted from a source row and written on every upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryFields {
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: Option<u64>,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
}

/// One write against the store
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOp {
    /// A name not seen before, with a newly assigned identity
    Insert {
        id: i64,
        name: String,
        fields: CountryFields,
        refreshed_at: DateTime<Utc>,
    },
    /// A name already stored; all extracted fields are overwritten
    Update {
        id: i64,
        name: String,
        fields: CountryFields,
        refreshed_at: DateTime<Utc>,
    },
}

impl UpsertOp {
    pub fn id(&self) -> i64 {
        match self {
            Self::Insert { id, .. } | Self::Update { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Insert { name, .. } | Self::Update { name, .. } => name,
        }
    }

    pub fn fields(&self) -> &CountryFields {
        match self {
            Self::Insert { fields, .. } | Self::Update { fields, .. } => fields,
        }
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        match self {
            Self::Insert { refreshed_at, .. } | Self::Update { refreshed_at, .. } => *refreshed_at,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }

    /// The full record this operation leaves in the store
    pub fn to_record(&self) -> CountryRecord {
        let fields = self.fields().clone();
        CountryRecord {
            id: self.id(),
            name: self.name().to_string(),
            capital: fields.capital,
            region: fields.region,
            population: fields.population,
            currency_code: fields.currency_code,
            exchange_rate: fields.exchange_rate,
            estimated_gdp: fields.estimated_gdp,
            flag_url: fields.flag_url,
            last_refreshed_at: self.refreshed_at(),
        }
    }
}

/// Output of one reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// Operations in source order
    pub operations: Vec<UpsertOp>,

    /// Record count once every operation is applied
    pub total_countries: u64,

    /// Timestamp stamped on every touched record and on the status row
    pub refreshed_at: DateTime<Utc>,

    /// Source rows dropped for lacking a usable name
    pub skipped: usize,
}

impl ReconcilePlan {
    pub fn inserted(&self) -> usize {
        self.operations.iter().filter(|op| op.is_insert()).count()
    }

    pub fn updated(&self) -> usize {
        self.operations.len() - self.inserted()
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Draw a GDP estimate, or `None` when population or a positive rate is missing
pub fn estimate_gdp<R: Rng + ?Sized>(
    population: Option<u64>,
    exchange_rate: Option<f64>,
    rng: &mut R,
) -> Option<f64> {
    let population = population?;
    let rate = exchange_rate.filter(|r| r.is_finite() && *r > 0.0)?;
    let multiplier = rng.gen_range(MULTIPLIER_MIN..MULTIPLIER_MAX);
    Some(population as f64 * multiplier / rate)
}

/// Reconcile fetched rows against existing identities
///
/// Rows are processed in input order. A name repeated within one batch
/// yields an insert followed by updates of the same identity, so the last
/// occurrence wins.
pub fn reconcile<R: Rng + ?Sized>(
    existing: &ExistingIndex,
    rows: &[CountrySourceRow],
    rates: &RateTable,
    now: DateTime<Utc>,
    rng: &mut R,
) -> ReconcilePlan {
    let refreshed_at = existing.latest_refresh().map_or(now, |prev| prev.max(now));

    let mut operations = Vec::with_capacity(rows.len());
    let mut introduced: HashMap<String, (i64, String)> = HashMap::new();
    let mut next_id = existing.max_id();
    let mut skipped = 0;

    for row in rows {
        let Some(name) = non_blank(row.name.clone()) else {
            skipped += 1;
            continue;
        };

        let currency_code = row.primary_currency_code().map(str::to_string);
        let exchange_rate = currency_code
            .as_deref()
            .and_then(|code| rates.get(code))
            .filter(|r| r.is_finite() && *r > 0.0);
        let estimated_gdp = estimate_gdp(row.population, exchange_rate, rng);

        let fields = CountryFields {
            capital: non_blank(row.capital.clone()),
            region: non_blank(row.region.clone()),
            population: row.population,
            currency_code,
            exchange_rate,
            estimated_gdp,
            flag_url: non_blank(row.flag.clone()),
        };

        let key = name_key(&name);
        let op = if let Some(entry) = existing.get(&name) {
            UpsertOp::Update {
                id: entry.id,
                name: entry.name.clone(),
                fields,
                refreshed_at,
            }
        } else if let Some((id, stored_name)) = introduced.get(&key) {
            UpsertOp::Update {
                id: *id,
                name: stored_name.clone(),
                fields,
                refreshed_at,
            }
        } else {
            next_id += 1;
            introduced.insert(key, (next_id, name.clone()));
            UpsertOp::Insert {
                id: next_id,
                name,
                fields,
                refreshed_at,
            }
        };

        operations.push(op);
    }

    ReconcilePlan {
        total_countries: (existing.len() + introduced.len()) as u64,
        operations,
        refreshed_at,
        skipped,
    }
}
