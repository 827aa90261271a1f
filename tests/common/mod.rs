//! Common test utilities

#![allow(dead_code)]

use meridian::models::{CountrySourceRow, CurrencyEntry, RateTable, SourceBatch};

/// Countries feed body with one complete entry, one without currencies and
/// one with a mistyped population
pub const COUNTRIES_JSON: &str = r#"[
    {
        "name": "Arcadia",
        "capital": "Port Elys",
        "region": "Europe",
        "population": 1000000,
        "flag": "https://flags.example/arcadia.svg",
        "currencies": [{"code": "ARC", "name": "Arcadian crown", "symbol": "A"}]
    },
    {
        "name": "Borduria",
        "capital": "Szohôd",
        "region": "Europe",
        "population": 2500000,
        "flag": "https://flags.example/borduria.svg",
        "currencies": []
    },
    {
        "name": "Syldavia",
        "population": "unknown"
    }
]"#;

/// Rates feed body with a success marker
pub const RATES_JSON: &str = r#"{
    "result": "success",
    "base_code": "USD",
    "rates": {"USD": 1, "ARC": 2.0, "BOR": 40.5}
}"#;

/// A source row with a single currency
pub fn country(name: &str, region: &str, population: u64, currency: Option<&str>) -> CountrySourceRow {
    CountrySourceRow {
        name: Some(name.to_string()),
        capital: Some(format!("{name} City")),
        region: Some(region.to_string()),
        population: Some(population),
        flag: Some(format!("https://flags.example/{}.svg", name.to_lowercase())),
        currencies: currency.map(|code| {
            vec![CurrencyEntry {
                code: Some(code.to_string()),
                ..Default::default()
            }]
        }),
    }
}

/// Rate table from (code, rate) pairs
pub fn rates(pairs: &[(&str, f64)]) -> RateTable {
    pairs.iter().map(|&(code, rate)| (code, rate)).collect()
}

/// The single-country batch used by most pipeline tests
pub fn arcadia_batch(rate: Option<f64>) -> SourceBatch {
    SourceBatch {
        countries: vec![country("Arcadia", "Europe", 1_000_000, Some("ARC"))],
        rates: match rate {
            Some(rate) => rates(&[("ARC", rate)]),
            None => RateTable::default(),
        },
    }
}

/// A mixed batch covering regions, currencies and missing data
pub fn world_batch() -> SourceBatch {
    SourceBatch {
        countries: vec![
            country("Arcadia", "Europe", 1_000_000, Some("ARC")),
            country("Borduria", "Europe", 2_500_000, Some("BOR")),
            country("Elbonia", "Africa", 800_000, Some("ELB")),
            country("Freedonia", "Americas", 5_000_000, None),
            country("Genovia", "Europe", 30_000, Some("EUR")),
        ],
        rates: rates(&[("ARC", 2.0), ("BOR", 40.5), ("EUR", 0.9)]),
    }
}
