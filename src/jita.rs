//! Reference pricing from the Fuzzwork market aggregates API.
//!
//! Pulls 5%-percentile buy/sell prices for The Forge (Jita's region) so
//! exported rows can be compared against the main trade hub.

use std::collections::BTreeMap;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::stats::{round2, MarketStatsRow};
use crate::TypeId;

/// The Forge.
const JITA_REGION_ID: i64 = 10_000_002;

/// Fuzzwork market aggregates endpoint.
const FUZZWORK_AGGREGATES_URL: &str = "https://market.fuzzwork.co.uk/aggregates/";

/// Errors from the reference-pricing fetch
#[derive(Debug, thiserror::Error)]
pub enum JitaError {
    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Response body was not the expected shape
    #[error("parse error: {0}")]
    Parse(String),
}

/// Jita percentile prices for one type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitaPrice {
    /// 5%-percentile sell price.
    pub sell: f64,
    /// 5%-percentile buy price.
    pub buy: f64,
}

/// A market stats row augmented with Jita reference prices.
#[derive(Debug, Clone, Serialize)]
pub struct JitaPriceRow {
    /// Item type id.
    pub type_id: TypeId,
    /// Display name, when resolution succeeded.
    pub type_name: Option<String>,
    /// Sum of remaining sell volume at the tracked structure.
    pub total_volume_remain: u64,
    /// Local 5th-percentile ask.
    pub price_5th_percentile: f64,
    /// Local lowest ask.
    pub min_price: f64,
    /// Mean of daily average prices.
    pub avg_of_avg_price: Option<f64>,
    /// Mean daily volume.
    pub avg_daily_volume: Option<f64>,
    /// Jita 5%-percentile sell price.
    pub jita_sell: Option<f64>,
    /// Jita 5%-percentile buy price.
    pub jita_buy: Option<f64>,
}

/// Fetch Jita percentile prices for the given types.
///
/// # Errors
///
/// Returns [`JitaError`] when the request fails or the body is not the
/// expected `{type_id: {buy: {...}, sell: {...}}}` object. Individual
/// unparseable entries are skipped with a warning instead.
pub async fn fetch_jita_prices(
    http: &Client,
    type_ids: &[TypeId],
) -> Result<BTreeMap<TypeId, JitaPrice>, JitaError> {
    if type_ids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let types = type_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let response = http
        .get(FUZZWORK_AGGREGATES_URL)
        .query(&[("region", JITA_REGION_ID.to_string()), ("types", types)])
        .send()
        .await
        .map_err(|e| JitaError::Network(e.to_string()))?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| JitaError::Parse(e.to_string()))?;
    let Some(object) = body.as_object() else {
        return Err(JitaError::Parse("expected a JSON object keyed by type id".to_string()));
    };

    let mut prices = BTreeMap::new();
    for (key, value) in object {
        let Ok(type_id) = key.parse::<TypeId>() else {
            warn!(key = %key, "skipping unparseable type id in aggregates response");
            continue;
        };
        prices.insert(
            type_id,
            JitaPrice {
                sell: round2(side_percentile(value, "sell")),
                buy: round2(side_percentile(value, "buy")),
            },
        );
    }

    debug!(types = prices.len(), "fetched Jita reference prices");
    Ok(prices)
}

/// Left-join Jita prices onto stats rows; unmatched rows keep empty price
/// columns.
pub fn apply_jita_prices(
    rows: &[MarketStatsRow],
    prices: &BTreeMap<TypeId, JitaPrice>,
) -> Vec<JitaPriceRow> {
    rows.iter()
        .map(|row| {
            let price = prices.get(&row.type_id);
            JitaPriceRow {
                type_id: row.type_id,
                type_name: row.type_name.clone(),
                total_volume_remain: row.total_volume_remain,
                price_5th_percentile: row.price_5th_percentile,
                min_price: row.min_price,
                avg_of_avg_price: row.avg_of_avg_price,
                avg_daily_volume: row.avg_daily_volume,
                jita_sell: price.map(|p| p.sell),
                jita_buy: price.map(|p| p.buy),
            }
        })
        .collect()
}

/// Extract `<side>.percentile`, tolerating numbers encoded as strings
/// (the aggregates API mixes both).
fn side_percentile(value: &Value, side: &str) -> f64 {
    value
        .get(side)
        .and_then(|s| s.get("percentile"))
        .and_then(lenient_f64)
        .unwrap_or(0.0)
}

fn lenient_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
