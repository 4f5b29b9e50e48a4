//! End-to-end market history fetch scenarios against a mock ESI server.

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use esi_market_tools::cache::HistoryCache;

use super::support::{record, test_client};

const REGION: i64 = 10_000_003;
const HISTORY_PATH: &str = "/markets/10000003/history/";

fn history_body() -> serde_json::Value {
    json!([
        {"date": "2026-08-01", "highest": 5.6, "lowest": 5.0, "average": 5.3, "order_count": 12, "volume": 1_000_000},
        {"date": "2026-08-02", "highest": 5.7, "lowest": 5.1, "average": 5.4, "order_count": 9, "volume": 800_000}
    ])
}

#[tokio::test]
async fn fresh_fetch_stores_validators_and_stamps_type_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("type_id", "34"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(history_body())
                .insert_header("ETag", "\"etag-34\"")
                .insert_header("Last-Modified", "Sat, 01 Aug 2026 00:00:00 GMT")
                .insert_header("X-ESI-Error-Limit-Remain", "100")
                .insert_header("X-ESI-Error-Limit-Reset", "60"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut client = test_client(&server.uri())
        .with_history_cache(HistoryCache::new(dir.path().join("cache.json")));

    let outcome = client.fetch_market_history(REGION, &[34]).await;

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.pages_fetched, 1);
    assert_eq!(outcome.cache_hits, 0);
    assert_eq!(outcome.error_count, 0);
    assert!(outcome.failed_keys.is_empty());
    for rec in &outcome.records {
        assert_eq!(rec.get("type_id").and_then(|v| v.as_i64()), Some(34));
    }

    let entry = client.history_cache().unwrap().get(34).unwrap();
    assert_eq!(entry.etag, "\"etag-34\"");
    assert_eq!(entry.last_modified, "Sat, 01 Aug 2026 00:00:00 GMT");
    assert_eq!(entry.records.len(), 2);
}

#[tokio::test]
async fn not_modified_serves_cached_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(header("If-None-Match", "\"etag-34\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cache = HistoryCache::new(dir.path().join("cache.json"));
    cache.put(
        34,
        "\"etag-34\"",
        "Sat, 01 Aug 2026 00:00:00 GMT",
        vec![record(json!({"date": "2026-08-01", "average": 5.3, "volume": 1_000_000, "type_id": 34}))],
    );

    let mut client = test_client(&server.uri()).with_history_cache(cache);
    let outcome = client.fetch_market_history(REGION, &[34]).await;

    assert_eq!(outcome.cache_hits, 1);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.error_count, 0);
    assert_eq!(outcome.total_retries, 0);
    assert!(outcome.failed_keys.is_empty());
}

#[tokio::test]
async fn degraded_entry_triggers_one_unconditional_refetch() {
    let server = MockServer::start().await;

    // The anomalous 304 (no conditional headers were sent, the cache entry
    // is degraded); exactly one, then the server answers with a full body.
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(304))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(history_body())
                .insert_header("ETag", "\"etag-new\""),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cache = HistoryCache::new(dir.path().join("cache.json"));
    // Validators but no records.
    cache.put(34, "\"etag-stale\"", "", Vec::new());

    let mut client = test_client(&server.uri()).with_history_cache(cache);
    let outcome = client.fetch_market_history(REGION, &[34]).await;

    assert_eq!(outcome.cache_hits, 0);
    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.failed_keys.is_empty());

    // The refetch repaired the cache entry.
    let entry = client.history_cache().unwrap().get(34).unwrap();
    assert_eq!(entry.etag, "\"etag-new\"");
    assert_eq!(entry.records.len(), 2);
}

#[tokio::test]
async fn persistent_server_errors_mark_the_type_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("type_id", "35"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"error": "internal server error"}))
                .insert_header("X-ESI-Error-Limit-Remain", "50")
                .insert_header("X-ESI-Error-Limit-Reset", "60"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("type_id", "34"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body()))
        .mount(&server)
        .await;

    let mut client = test_client(&server.uri());
    let outcome = client.fetch_market_history(REGION, &[35, 34]).await;

    // max_retries = 2: initial attempt plus two retries, all failing.
    assert_eq!(outcome.error_count, 3);
    assert_eq!(outcome.total_retries, 2);
    assert!(outcome.failed_keys.contains(&35));

    // The failure did not stop the batch; the next type still succeeded.
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(
        outcome.records[0].get("type_id").and_then(|v| v.as_i64()),
        Some(34)
    );
}

#[tokio::test]
async fn near_exhausted_budget_cools_down_without_spending_a_retry() {
    let server = MockServer::start().await;
    // One failure carrying a nearly-drained error budget, then recovery.
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"error": "temporary"}))
                .insert_header("X-ESI-Error-Limit-Remain", "1")
                .insert_header("X-ESI-Error-Limit-Reset", "1"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body()))
        .mount(&server)
        .await;

    let mut client = test_client(&server.uri());
    let outcome = client.fetch_market_history(REGION, &[34]).await;

    // The cooldown retry is mandated by the server's budget signal and
    // must not count against the local retry limit.
    assert_eq!(outcome.error_count, 1);
    assert_eq!(outcome.total_retries, 0);
    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.failed_keys.is_empty());
}

#[tokio::test]
async fn multi_page_history_fetches_each_page_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"date": "2026-08-01", "average": 5.3, "volume": 1_000_000}]))
                .insert_header("X-Pages", "2"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"date": "2026-08-02", "average": 5.4, "volume": 800_000}]))
                .insert_header("X-Pages", "2"),
        )
        .mount(&server)
        .await;

    let mut client = test_client(&server.uri());
    let outcome = client.fetch_market_history(REGION, &[34]).await;

    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.error_count, 0);
    let dates: Vec<&str> = outcome
        .records
        .iter()
        .filter_map(|rec| rec.get("date").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(dates, ["2026-08-01", "2026-08-02"]);
}

#[tokio::test]
async fn mixed_batch_counts_cache_hits_per_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(header_exists("If-None-Match"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"date": "2026-08-01", "average": 1.0, "volume": 10}]))
                .insert_header("ETag", "\"etag-36\""),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cache = HistoryCache::new(dir.path().join("cache.json"));
    for type_id in [34, 35] {
        cache.put(
            type_id,
            format!("\"etag-{type_id}\""),
            "",
            vec![record(json!({"date": "2026-08-01", "average": 2.0, "volume": 5, "type_id": type_id}))],
        );
    }

    let mut client = test_client(&server.uri()).with_history_cache(cache);
    let outcome = client.fetch_market_history(REGION, &[34, 35, 36]).await;

    assert_eq!(outcome.cache_hits, 2);
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.pages_fetched, 3);
    assert!(outcome.failed_keys.is_empty());
}

#[tokio::test]
async fn without_a_cache_no_conditional_headers_are_sent() {
    let server = MockServer::start().await;
    // Any conditional request would be a bug; answer it with an error.
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .and(header_exists("If-None-Match"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body()))
        .mount(&server)
        .await;

    let mut client = test_client(&server.uri());
    let outcome = client.fetch_market_history(REGION, &[34]).await;

    assert_eq!(outcome.error_count, 0);
    assert_eq!(outcome.records.len(), 2);
}
