//! Integration tests for HttpFetcher using wiremock
//!
//! These tests validate how the feed fetcher classifies upstream behavior.

mod common;

use std::time::Duration;

use meridian::sources::{DataFetcher, HttpFetcher};
use meridian::utils::error::{DataFeed, FetchError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_for(server: &MockServer, timeout: Duration) -> HttpFetcher {
    HttpFetcher::with_timeouts(
        &format!("{}/countries", server.uri()),
        &format!("{}/rates", server.uri()),
        Duration::from_millis(200),
        timeout,
        "meridian-test",
    )
    .unwrap()
}

async fn mount_json(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "application/json"),
        )
        .mount(server)
        .await;
}

/// Test both feeds fetched and decoded
#[tokio::test]
async fn test_fetch_success() {
    let server = MockServer::start().await;
    mount_json(&server, "/countries", common::COUNTRIES_JSON).await;
    mount_json(&server, "/rates", common::RATES_JSON).await;

    let fetcher = fetcher_for(&server, Duration::from_secs(5));
    let batch = fetcher.fetch().await.expect("fetch should succeed");

    assert_eq!(batch.countries.len(), 3);
    assert_eq!(batch.countries[0].name.as_deref(), Some("Arcadia"));
    assert_eq!(batch.countries[0].primary_currency_code(), Some("ARC"));
    assert!(batch.countries[1].primary_currency_code().is_none());
    // A mistyped population is dropped, the row is kept
    assert_eq!(batch.countries[2].name.as_deref(), Some("Syldavia"));
    assert!(batch.countries[2].population.is_none());

    assert_eq!(batch.rates.get("ARC"), Some(2.0));
    assert_eq!(batch.rates.base.as_deref(), Some("USD"));
}

/// Test a server error is attributed to the countries feed
#[tokio::test]
async fn test_countries_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/countries"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1) // No retry
        .mount(&server)
        .await;
    mount_json(&server, "/rates", common::RATES_JSON).await;

    let fetcher = fetcher_for(&server, Duration::from_secs(5));
    let err = fetcher.fetch().await.unwrap_err();

    assert_eq!(err.feed(), DataFeed::Countries);
    assert!(matches!(err.cause(), FetchError::Status(500)));
    assert!(err
        .to_string()
        .starts_with("Could not fetch data from Countries API"));
}

/// Test a slow rates feed times out
#[tokio::test]
async fn test_rates_timeout() {
    let server = MockServer::start().await;
    mount_json(&server, "/countries", common::COUNTRIES_JSON).await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(common::RATES_JSON)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, Duration::from_millis(300));
    let err = fetcher.fetch().await.unwrap_err();

    assert_eq!(err.feed(), DataFeed::ExchangeRates);
    assert!(matches!(err.cause(), FetchError::Timeout));
    assert!(err
        .to_string()
        .starts_with("Could not fetch data from Exchange Rates API"));
}

/// Test a rates payload reporting failure
#[tokio::test]
async fn test_rates_rejected() {
    let server = MockServer::start().await;
    mount_json(&server, "/countries", common::COUNTRIES_JSON).await;
    mount_json(
        &server,
        "/rates",
        r#"{"result": "error", "error-type": "quota-reached"}"#,
    )
    .await;

    let fetcher = fetcher_for(&server, Duration::from_secs(5));
    let err = fetcher.fetch().await.unwrap_err();

    assert_eq!(err.feed(), DataFeed::ExchangeRates);
    match err.cause() {
        FetchError::Rejected(reason) => assert_eq!(reason, "quota-reached"),
        other => panic!("Expected rejection, got: {:?}", other),
    }
}

/// Test a countries body that is not an array
#[tokio::test]
async fn test_countries_not_an_array() {
    let server = MockServer::start().await;
    mount_json(&server, "/countries", r#"{"status": 404, "message": "Not Found"}"#).await;
    mount_json(&server, "/rates", common::RATES_JSON).await;

    let fetcher = fetcher_for(&server, Duration::from_secs(5));
    let err = fetcher.fetch().await.unwrap_err();

    assert_eq!(err.feed(), DataFeed::Countries);
    assert!(matches!(err.cause(), FetchError::Decode(_)));
}

/// Test countries is reported when both feeds fail
#[tokio::test]
async fn test_both_feeds_fail_reports_countries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, Duration::from_secs(5));
    let err = fetcher.fetch().await.unwrap_err();

    assert_eq!(err.feed(), DataFeed::Countries);
    assert!(matches!(err.cause(), FetchError::Status(503)));
}

/// Test an unreachable host is a transport failure
#[tokio::test]
async fn test_connection_refused() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let fetcher = HttpFetcher::with_timeouts(
        &format!("{uri}/countries"),
        &format!("{uri}/rates"),
        Duration::from_millis(200),
        Duration::from_secs(2),
        "meridian-test",
    )
    .unwrap();

    let err = fetcher.fetch().await.unwrap_err();
    assert_eq!(err.feed(), DataFeed::Countries);
    assert!(matches!(
        err.cause(),
        FetchError::Transport(_) | FetchError::Timeout
    ));
}
