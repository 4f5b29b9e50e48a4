//! Bulk market-order pagination scenarios against a mock ESI server.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::test_client;

const STRUCTURE: i64 = 1_035_466_617_946;
const ORDERS_PATH: &str = "/markets/structures/1035466617946/";

fn orders_page(first_order_id: i64) -> serde_json::Value {
    json!([
        {"order_id": first_order_id, "type_id": 34, "price": 5.05, "volume_remain": 100, "volume_total": 1000, "is_buy_order": false, "issued": "2026-08-01T12:00:00Z", "range": "region"},
        {"order_id": first_order_id + 1, "type_id": 35, "price": 7.0, "volume_remain": 10, "volume_total": 10, "is_buy_order": true, "issued": "2026-08-01T12:00:00Z", "range": "station"}
    ])
}

#[tokio::test]
async fn fetches_every_page_advertised_by_x_pages() {
    let server = MockServer::start().await;
    for page in 1..=3 {
        Mock::given(method("GET"))
            .and(path(ORDERS_PATH))
            .and(query_param("page", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(orders_page(i64::from(page) * 100))
                    .insert_header("X-Pages", "3"),
            )
            .mount(&server)
            .await;
    }

    let client = test_client(&server.uri());
    let outcome = client.fetch_market_orders(STRUCTURE).await;

    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(outcome.records.len(), 6);
    assert_eq!(outcome.error_count, 0);
    assert_eq!(outcome.total_retries, 0);
}

#[tokio::test]
async fn empty_page_ends_pagination_early() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(orders_page(100))
                .insert_header("X-Pages", "5"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).insert_header("X-Pages", "5"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let outcome = client.fetch_market_orders(STRUCTURE).await;

    assert_eq!(outcome.pages_fetched, 1);
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn exhausted_error_budget_stops_the_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(orders_page(100))
                .insert_header("X-Pages", "4")
                .insert_header("X-ESI-Error-Limit-Remain", "0")
                .insert_header("X-ESI-Error-Limit-Reset", "42"),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let outcome = client.fetch_market_orders(STRUCTURE).await;

    // The budget check fires before the page is consumed.
    assert_eq!(outcome.pages_fetched, 0);
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn transient_error_is_retried_and_counted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({"error": "bad gateway"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(orders_page(100))
                .insert_header("X-Pages", "1"),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let outcome = client.fetch_market_orders(STRUCTURE).await;

    assert_eq!(outcome.error_count, 1);
    assert_eq!(outcome.total_retries, 1);
    assert_eq!(outcome.pages_fetched, 1);
    assert_eq!(outcome.records.len(), 2);
}

#[tokio::test]
async fn persistent_errors_stop_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let outcome = client.fetch_market_orders(STRUCTURE).await;

    // Initial attempt plus max_retries (2) retries.
    assert_eq!(outcome.error_count, 3);
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.pages_fetched, 0);
}
