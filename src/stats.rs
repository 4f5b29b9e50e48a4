//! Pure market-data aggregation.
//!
//! No I/O and no network here: functions take record slices and return
//! aggregate rows, so everything is unit-testable with literal data.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{Record, TypeId};

/// Days of history included in the rolling averages.
pub const HISTORY_WINDOW_DAYS: i64 = 30;

/// Aggregated sell-side order book for one type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellOrderStats {
    /// Item type id.
    pub type_id: TypeId,
    /// Sum of remaining volume across sell orders.
    pub total_volume_remain: u64,
    /// Lowest ask.
    pub min_price: f64,
    /// 5th-percentile ask, linearly interpolated.
    pub price_5th_percentile: f64,
}

/// Rolling averages computed from recent daily history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    /// Mean of the daily average prices, rounded to 2 decimals.
    pub avg_of_avg_price: f64,
    /// Mean daily traded volume, rounded to 2 decimals.
    pub avg_daily_volume: f64,
}

/// Final per-type market summary row.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatsRow {
    /// Item type id.
    pub type_id: TypeId,
    /// Display name, when resolution succeeded.
    pub type_name: Option<String>,
    /// Sum of remaining sell volume.
    pub total_volume_remain: u64,
    /// 5th-percentile ask.
    pub price_5th_percentile: f64,
    /// Lowest ask.
    pub min_price: f64,
    /// Mean of daily average prices; `None` when no history matched.
    pub avg_of_avg_price: Option<f64>,
    /// Mean daily volume; `None` when no history matched.
    pub avg_daily_volume: Option<f64>,
}

fn field_i64(record: &Record, key: &str) -> Option<i64> {
    record.get(key).and_then(Value::as_i64)
}

fn field_f64(record: &Record, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

fn field_bool(record: &Record, key: &str) -> Option<bool> {
    record.get(key).and_then(Value::as_bool)
}

fn field_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Keep only the orders whose type id is in `type_ids`.
pub fn filter_orders(type_ids: &BTreeSet<TypeId>, orders: &[Record]) -> Vec<Record> {
    orders
        .iter()
        .filter(|order| {
            field_i64(order, "type_id").map_or(false, |id| type_ids.contains(&id))
        })
        .cloned()
        .collect()
}

/// Aggregate sell orders per type: total remaining volume, minimum price,
/// and the 5th-percentile price. Buy orders and records missing a type id
/// or price are skipped.
pub fn aggregate_sell_orders(orders: &[Record]) -> Vec<SellOrderStats> {
    let mut prices: BTreeMap<TypeId, Vec<f64>> = BTreeMap::new();
    let mut volumes: BTreeMap<TypeId, u64> = BTreeMap::new();

    for order in orders {
        if field_bool(order, "is_buy_order").unwrap_or(false) {
            continue;
        }
        let Some(type_id) = field_i64(order, "type_id") else {
            continue;
        };
        let Some(price) = field_f64(order, "price") else {
            continue;
        };
        let volume = field_i64(order, "volume_remain").unwrap_or(0).max(0) as u64;

        prices.entry(type_id).or_default().push(price);
        *volumes.entry(type_id).or_default() += volume;
    }

    prices
        .into_iter()
        .map(|(type_id, mut type_prices)| {
            type_prices.sort_by(f64::total_cmp);
            SellOrderStats {
                type_id,
                total_volume_remain: volumes.get(&type_id).copied().unwrap_or(0),
                min_price: type_prices[0],
                price_5th_percentile: percentile(&type_prices, 0.05),
            }
        })
        .collect()
}

/// Percentile with linear interpolation over sorted values.
///
/// `sorted` must be non-empty and ascending.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = pos - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Per-type mean daily average price and mean daily volume over the
/// trailing `days` window, rounded to 2 decimals. Records with an
/// unparseable date are skipped.
pub fn compute_history_stats(history: &[Record], days: i64) -> BTreeMap<TypeId, HistoryStats> {
    let cutoff = Utc::now().date_naive() - Duration::days(days);
    let mut sums: BTreeMap<TypeId, (f64, f64, u64)> = BTreeMap::new();

    for record in history {
        let Some(type_id) = field_i64(record, "type_id") else {
            continue;
        };
        let Some(date) = field_str(record, "date")
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff {
            continue;
        }

        let entry = sums.entry(type_id).or_insert((0.0, 0.0, 0));
        entry.0 += field_f64(record, "average").unwrap_or(0.0);
        entry.1 += field_f64(record, "volume").unwrap_or(0.0);
        entry.2 += 1;
    }

    sums.into_iter()
        .map(|(type_id, (avg_sum, volume_sum, count))| {
            let count = count as f64;
            (
                type_id,
                HistoryStats {
                    avg_of_avg_price: round2(avg_sum / count),
                    avg_daily_volume: round2(volume_sum / count),
                },
            )
        })
        .collect()
}

/// Left-join sell-order aggregates with history stats and type names.
/// Types without history keep `None` in the history columns.
pub fn merge_market_stats(
    sell_orders: Vec<SellOrderStats>,
    history_stats: &BTreeMap<TypeId, HistoryStats>,
    type_names: &BTreeMap<TypeId, String>,
) -> Vec<MarketStatsRow> {
    sell_orders
        .into_iter()
        .map(|stats| {
            let history = history_stats.get(&stats.type_id);
            MarketStatsRow {
                type_id: stats.type_id,
                type_name: type_names.get(&stats.type_id).cloned(),
                total_volume_remain: stats.total_volume_remain,
                price_5th_percentile: stats.price_5th_percentile,
                min_price: stats.min_price,
                avg_of_avg_price: history.map(|h| h.avg_of_avg_price),
                avg_daily_volume: history.map(|h| h.avg_daily_volume),
            }
        })
        .collect()
}
