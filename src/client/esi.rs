//! ESI HTTP fetch engine.
//!
//! All EVE ESI traffic goes through [`EsiClient`]: bulk paginated fetches
//! of structure market orders, per-type market-history fetches backed by
//! the conditional-request cache, type-name resolution, and a
//! connectivity probe. Transient failures are retried with exponential
//! backoff and reported through [`FetchOutcome`] counters rather than
//! `Err` returns.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::AccessToken;
use crate::cache::HistoryCache;
use crate::client::outcome::FetchOutcome;
use crate::client::rate_limit::RateLimiter;
use crate::client::{EsiError, EsiResult};
use crate::{Record, TypeId};

/// Header carrying the page-count hint for paginated endpoints. The value
/// may grow between pages; the fetch loop re-reads it on every response.
const HEADER_PAGES: &str = "x-pages";

/// Remaining server-side error budget before a temporary ban.
const HEADER_ERROR_LIMIT_REMAIN: &str = "x-esi-error-limit-remain";

/// Seconds until the error budget resets.
const HEADER_ERROR_LIMIT_RESET: &str = "x-esi-error-limit-reset";

/// Bulk fetch logs a warning when the remaining budget drops below this.
const ERROR_BUDGET_LOW_WATER: u64 = 10;

/// History fetch sleeps out the reset window when the remaining budget
/// drops below this.
const ERROR_BUDGET_COOLDOWN_THRESHOLD: u64 = 2;

/// Per-request timeout for history lookups.
const HISTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection timeout for the underlying HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall request timeout for the underlying HTTP client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning knobs for the fetch engine.
#[derive(Debug, Clone)]
pub struct EsiClientConfig {
    /// Base URL of the ESI service, without a trailing slash.
    pub base_url: String,
    /// User-Agent header value sent with every request.
    pub user_agent: String,
    /// Retry ceiling per page or type.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_delay: Duration,
    /// Backoff multiplier: `retry_delay * backoff_factor^retries`.
    pub backoff_factor: f64,
}

impl Default for EsiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://esi.evetech.net/latest".to_string(),
            user_agent: "esi-market-tools/0.2".to_string(),
            max_retries: 5,
            retry_delay: Duration::from_secs(3),
            backoff_factor: 2.0,
        }
    }
}

/// Result of a connectivity probe against the structure-orders endpoint.
#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    /// Whether page 1 was fetched and decoded successfully.
    pub success: bool,
    /// Orders returned on page 1.
    pub order_count: usize,
    /// Total pages advertised by the endpoint.
    pub total_pages: u64,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

/// Error-budget signal parsed from response headers.
///
/// Absent headers mean "no signal", not an exhausted budget; budget
/// actions only trigger on values the server actually sent.
#[derive(Debug, Clone, Copy, Default)]
struct ErrorBudget {
    remain: Option<u64>,
    reset_seconds: Option<u64>,
}

impl ErrorBudget {
    fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remain: header_u64(headers, HEADER_ERROR_LIMIT_REMAIN),
            reset_seconds: header_u64(headers, HEADER_ERROR_LIMIT_RESET),
        }
    }

    fn exhausted(&self) -> bool {
        self.remain == Some(0)
    }
}

/// Client for the EVE ESI market endpoints.
///
/// Owns the HTTP connection pool, the rate limiter, and (optionally) the
/// history cache. Fetch methods consume one rate-limiter token per
/// outbound request, retries included.
#[derive(Debug)]
pub struct EsiClient {
    http: Client,
    config: EsiClientConfig,
    token: AccessToken,
    rate_limiter: RateLimiter,
    history_cache: Option<HistoryCache>,
}

impl EsiClient {
    /// Create a client with a default rate limiter and no history cache.
    ///
    /// # Errors
    ///
    /// Returns [`EsiError::Http`] if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: EsiClientConfig, token: AccessToken) -> EsiResult<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EsiError::Http(e.to_string()))?;

        Ok(Self {
            http,
            config,
            token,
            rate_limiter: RateLimiter::default(),
            history_cache: None,
        })
    }

    /// Replace the default rate limiter.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Attach a history cache, enabling conditional requests.
    pub fn with_history_cache(mut self, cache: HistoryCache) -> Self {
        self.history_cache = Some(cache);
        self
    }

    /// The attached history cache, if any.
    pub fn history_cache(&self) -> Option<&HistoryCache> {
        self.history_cache.as_ref()
    }

    /// The underlying HTTP client, for collaborators that talk to other
    /// services (reference pricing) and want to share the connection pool.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Persist the history cache, if one is attached. Save failures are
    /// logged and swallowed; a stale cache file is not fatal.
    pub fn save_cache(&self) {
        if let Some(cache) = &self.history_cache {
            if let Err(e) = cache.save() {
                warn!(error = %e, "failed to save history cache");
            }
        }
    }

    fn backoff_delay(&self, retries: u32) -> Duration {
        calculate_backoff(self.config.retry_delay, self.config.backoff_factor, retries)
    }

    /// Fetch every page of market orders for a structure.
    ///
    /// Pagination follows the `X-Pages` hint, which is re-read on every
    /// response and may grow mid-fetch. The loop stops when the last page
    /// is consumed, a page comes back empty, the server's error budget is
    /// exhausted, or a page keeps failing past the retry limit.
    pub async fn fetch_market_orders(&self, structure_id: i64) -> FetchOutcome {
        let start = Instant::now();
        let url = format!("{}/markets/structures/{}/", self.config.base_url, structure_id);

        let mut outcome = FetchOutcome::default();
        let mut page: u64 = 1;
        let mut total_pages: u64 = 1;
        let mut retries: u32 = 0;

        info!(structure_id, "fetching market orders");

        while page <= total_pages {
            self.rate_limiter.acquire().await;

            let response = match self
                .http
                .get(&url)
                .query(&[("page", page.to_string())])
                .bearer_auth(&self.token.access_token)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    outcome.error_count += 1;
                    warn!(page, error = %e, "network error fetching orders page");
                    if retries < self.config.max_retries {
                        sleep(self.backoff_delay(retries)).await;
                        retries += 1;
                        continue;
                    }
                    error!(page, "orders page failed after max retries, stopping fetch");
                    break;
                }
            };

            if let Some(pages) = header_u64(response.headers(), HEADER_PAGES) {
                total_pages = pages;
            }

            let budget = ErrorBudget::from_headers(response.headers());
            if budget.exhausted() {
                error!("ESI error limit reached, stopping requests");
                break;
            }
            if let Some(remain) = budget.remain {
                if remain < ERROR_BUDGET_LOW_WATER {
                    warn!(
                        remain,
                        reset_seconds = ?budget.reset_seconds,
                        "ESI error budget running low"
                    );
                }
            }

            let status = response.status();
            if status != StatusCode::OK {
                outcome.error_count += 1;
                let message = error_message(response, status).await;
                error!(page, %status, message = %message, retries, "error fetching orders page");
                if retries < self.config.max_retries {
                    sleep(self.backoff_delay(retries)).await;
                    retries += 1;
                    continue;
                }
                error!(page, "orders page failed after max retries, stopping fetch");
                break;
            }

            outcome.total_retries += u64::from(retries);
            retries = 0;

            let orders: Vec<Record> = match response.json().await {
                Ok(orders) => orders,
                Err(e) => {
                    outcome.error_count += 1;
                    warn!(page, error = %e, "failed to decode orders page, skipping");
                    page += 1;
                    continue;
                }
            };

            if orders.is_empty() {
                debug!(page, "empty orders page, pagination complete");
                break;
            }

            debug!(page, total_pages, orders = orders.len(), "fetched orders page");
            outcome.records.extend(orders);
            outcome.pages_fetched += 1;
            page += 1;
        }

        // Retries spent on a page that never succeeded still count.
        outcome.total_retries += u64::from(retries);

        outcome.elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            orders = outcome.records.len(),
            pages = outcome.pages_fetched,
            errors = outcome.error_count,
            retries = outcome.total_retries,
            elapsed_seconds = outcome.elapsed_seconds,
            "market orders fetch complete"
        );
        outcome
    }

    /// Fetch market history for each type id, strictly in order.
    ///
    /// Each response falls into one of four buckets:
    ///
    /// 1. `304 Not Modified` with cached records: adopt them (cache hit).
    /// 2. `304 Not Modified` without cached records: the entry is degraded;
    ///    retry once with conditional headers suppressed so the server must
    ///    answer with a full body.
    /// 3. `200 OK`: stamp each record with its type id, upsert the cache
    ///    entry, and append the records.
    /// 4. Anything else: retryable failure. Near-exhausted error budgets
    ///    sleep out the reset window first; otherwise exponential backoff
    ///    until the retry limit marks the type as failed.
    pub async fn fetch_market_history(
        &mut self,
        region_id: i64,
        type_ids: &[TypeId],
    ) -> FetchOutcome {
        let start = Instant::now();
        let url = format!("{}/markets/{}/history/", self.config.base_url, region_id);

        let mut outcome = FetchOutcome::default();

        info!(region_id, types = type_ids.len(), "fetching market history");
        if let Some(cache) = &self.history_cache {
            info!(entries = cache.entry_count(), "history cache attached");
        }

        for &type_id in type_ids {
            let mut page: u64 = 1;
            let mut max_pages: u64 = 1;
            let mut retries: u32 = 0;
            let mut skip_cache = false;

            while page <= max_pages {
                let mut request = self
                    .http
                    .get(&url)
                    .query(&[
                        ("datasource", "tranquility".to_string()),
                        ("type_id", type_id.to_string()),
                        ("page", page.to_string()),
                    ])
                    .timeout(HISTORY_REQUEST_TIMEOUT);

                if !skip_cache {
                    if let Some(cache) = &self.history_cache {
                        request = request.headers(cache.get_conditional_headers(type_id));
                    }
                }

                self.rate_limiter.acquire().await;

                let response = match request.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        outcome.error_count += 1;
                        if e.is_timeout() {
                            warn!(type_id, "history request timed out");
                        } else {
                            warn!(type_id, error = %e, "network error fetching history");
                        }
                        if retries < self.config.max_retries {
                            sleep(self.backoff_delay(retries)).await;
                            retries += 1;
                            continue;
                        }
                        error!(type_id, "history failed after max retries, marking type failed");
                        outcome.failed_keys.insert(type_id);
                        break;
                    }
                };

                let status = response.status();
                debug!(type_id, status = status.as_u16(), "history response");

                if let Some(pages) = header_u64(response.headers(), HEADER_PAGES) {
                    max_pages = pages;
                }
                let budget = ErrorBudget::from_headers(response.headers());

                if status == StatusCode::NOT_MODIFIED {
                    if let Some(cache) = &self.history_cache {
                        if cache.has_data(type_id) {
                            if let Some(entry) = cache.get(type_id) {
                                outcome.records.extend(entry.records.iter().cloned());
                            }
                            outcome.cache_hits += 1;
                            outcome.pages_fetched += 1;
                            debug!(type_id, "history unchanged, served from cache");
                            break;
                        }
                    }
                    if !skip_cache {
                        // Validators without records: a 304 here would trap
                        // the type in a permanently-empty state. Force one
                        // unconditional fetch.
                        warn!(type_id, "304 with no cached records, refetching without validators");
                        skip_cache = true;
                        continue;
                    }
                    // A second 304 with no cached data falls through to the
                    // ordinary failure path below.
                }

                if status != StatusCode::OK {
                    outcome.error_count += 1;
                    let message = error_message(response, status).await;
                    error!(type_id, %status, message = %message, "error fetching history");

                    if let Some(remain) = budget.remain {
                        if remain < ERROR_BUDGET_COOLDOWN_THRESHOLD {
                            let cooldown = budget.reset_seconds.unwrap_or(60);
                            warn!(
                                cooldown_seconds = cooldown,
                                "ESI error budget nearly exhausted, waiting for reset"
                            );
                            sleep(Duration::from_secs(cooldown)).await;
                            continue;
                        }
                    }
                    if retries < self.config.max_retries {
                        sleep(self.backoff_delay(retries)).await;
                        retries += 1;
                        continue;
                    }
                    error!(type_id, "history failed after max retries, marking type failed");
                    outcome.failed_keys.insert(type_id);
                    break;
                }

                let etag = header_string(response.headers(), "etag");
                let last_modified = header_string(response.headers(), "last-modified");

                let history: Vec<Record> = match response.json().await {
                    Ok(history) => history,
                    Err(e) => {
                        outcome.error_count += 1;
                        warn!(type_id, error = %e, "failed to decode history body, skipping type");
                        break;
                    }
                };

                let mut stamped = Vec::with_capacity(history.len());
                for mut record in history {
                    record.insert("type_id".to_string(), Value::from(type_id));
                    stamped.push(record);
                }

                if let Some(cache) = &mut self.history_cache {
                    cache.put(type_id, etag, last_modified, stamped.clone());
                }

                if stamped.is_empty() {
                    warn!(type_id, "no history data for type");
                } else {
                    debug!(type_id, records = stamped.len(), "fetched history records");
                    outcome.records.extend(stamped);
                }

                outcome.total_retries += u64::from(retries);
                retries = 0;
                outcome.pages_fetched += 1;
                page += 1;
            }

            // Retries spent on a type that ultimately failed still count.
            outcome.total_retries += u64::from(retries);
        }

        outcome.elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            records = outcome.records.len(),
            responses = outcome.pages_fetched,
            cache_hits = outcome.cache_hits,
            errors = outcome.error_count,
            retries = outcome.total_retries,
            failed = outcome.failed_keys.len(),
            elapsed_seconds = outcome.elapsed_seconds,
            "market history fetch complete"
        );
        if !outcome.failed_keys.is_empty() {
            warn!(failed_types = ?outcome.failed_keys, "some types could not be fetched");
        }
        outcome
    }

    /// Resolve type ids to display names via the universe/names endpoint.
    ///
    /// Failures are soft: any error yields an empty map so downstream rows
    /// simply lack names.
    pub async fn fetch_type_names(&self, type_ids: &[TypeId]) -> BTreeMap<TypeId, String> {
        if type_ids.is_empty() {
            return BTreeMap::new();
        }

        let url = format!("{}/universe/names/", self.config.base_url);
        self.rate_limiter.acquire().await;

        let result: Result<Vec<Value>, reqwest::Error> = async {
            let response = self
                .http
                .post(&url)
                .query(&[("datasource", "tranquility")])
                .json(&type_ids)
                .send()
                .await?
                .error_for_status()?;
            response.json().await
        }
        .await;

        match result {
            Ok(items) => {
                let names: BTreeMap<TypeId, String> = items
                    .iter()
                    .filter_map(|item| {
                        let id = item.get("id")?.as_i64()?;
                        let name = item.get("name")?.as_str()?;
                        Some((id, name.to_string()))
                    })
                    .collect();
                debug!(resolved = names.len(), requested = type_ids.len(), "resolved type names");
                names
            }
            Err(e) => {
                error!(error = %e, "failed to fetch type names");
                BTreeMap::new()
            }
        }
    }

    /// Probe connectivity by fetching page 1 of structure market orders.
    pub async fn test_connectivity(&self, structure_id: i64) -> ConnectivityReport {
        let url = format!("{}/markets/structures/{}/", self.config.base_url, structure_id);
        self.rate_limiter.acquire().await;

        let response = match self
            .http
            .get(&url)
            .query(&[("page", "1")])
            .bearer_auth(&self.token.access_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ConnectivityReport {
                    success: false,
                    order_count: 0,
                    total_pages: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        let status = response.status();
        let total_pages = header_u64(response.headers(), HEADER_PAGES).unwrap_or(1);

        if status != StatusCode::OK {
            let message = error_message(response, status).await;
            return ConnectivityReport {
                success: false,
                order_count: 0,
                total_pages,
                error: Some(message),
            };
        }

        match response.json::<Vec<Record>>().await {
            Ok(orders) => ConnectivityReport {
                success: true,
                order_count: orders.len(),
                total_pages,
                error: None,
            },
            Err(e) => ConnectivityReport {
                success: false,
                order_count: 0,
                total_pages,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Compute an exponential backoff delay: `base * factor^retries`.
fn calculate_backoff(base: Duration, factor: f64, retries: u32) -> Duration {
    Duration::from_secs_f64(base.as_secs_f64() * factor.powi(retries as i32))
}

/// Parse a numeric header, tolerating absence and malformed values.
fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Read a header as a string, defaulting to empty when absent or non-ASCII.
fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Extract the server's error description from a failed response, falling
/// back to the status line when the body is not the usual `{"error": ...}`.
async fn error_message(response: Response, status: StatusCode) -> String {
    match response.json::<Value>().await {
        Ok(body) => body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}")),
        Err(_) => format!("HTTP {status}"),
    }
}
