//! CSV export for market orders, history, and aggregated stats.
//!
//! Raw order/history exports use a fixed column order regardless of what
//! extra fields the API returns; stats exports serialize their row
//! structs directly.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::jita::JitaPriceRow;
use crate::stats::MarketStatsRow;
use crate::Record;

use super::{OutputError, OutputResult};

/// Column order for raw market-order exports.
const ORDER_FIELDS: &[&str] = &[
    "type_id",
    "order_id",
    "price",
    "volume_remain",
    "volume_total",
    "is_buy_order",
    "issued",
    "range",
];

/// Column order for market-history exports.
const HISTORY_FIELDS: &[&str] = &[
    "date",
    "type_id",
    "highest",
    "lowest",
    "average",
    "order_count",
    "volume",
];

/// Build a timestamped output path: `<dir>/<prefix>_YYYY-MM-DD_HH-MM-SS.csv`.
pub fn timestamped_path(output_dir: &Path, prefix: &str) -> PathBuf {
    output_dir.join(format!(
        "{prefix}_{}.csv",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ))
}

fn create_writer(path: &Path) -> OutputResult<Writer<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::Io(format!("failed to create {}: {e}", parent.display())))?;
    }
    Writer::from_path(path).map_err(|e| OutputError::Io(e.to_string()))
}

/// Render one record field as a CSV cell. Missing fields and nulls become
/// empty cells; strings are written without JSON quoting.
fn cell(record: &Record, field: &str) -> String {
    match record.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
    }
}

fn write_records(records: &[Record], fields: &[&str], path: &Path) -> OutputResult<()> {
    let mut writer = create_writer(path)?;
    writer
        .write_record(fields)
        .map_err(|e| OutputError::Csv(e.to_string()))?;
    for record in records {
        let row: Vec<String> = fields.iter().map(|field| cell(record, field)).collect();
        writer
            .write_record(&row)
            .map_err(|e| OutputError::Csv(e.to_string()))?;
    }
    writer.flush().map_err(|e| OutputError::Io(e.to_string()))?;
    Ok(())
}

fn write_rows<T: Serialize>(rows: &[T], path: &Path) -> OutputResult<()> {
    let mut writer = create_writer(path)?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| OutputError::Csv(e.to_string()))?;
    }
    writer.flush().map_err(|e| OutputError::Io(e.to_string()))?;
    Ok(())
}

/// Write raw market orders in the fixed export column order.
///
/// # Errors
///
/// Returns [`OutputError`] on filesystem or serialization failure.
pub fn write_orders_csv(orders: &[Record], path: &Path) -> OutputResult<()> {
    write_records(orders, ORDER_FIELDS, path)?;
    info!(rows = orders.len(), path = %path.display(), "market orders saved");
    Ok(())
}

/// Write raw market history in the fixed export column order.
///
/// # Errors
///
/// Returns [`OutputError`] on filesystem or serialization failure.
pub fn write_history_csv(history: &[Record], path: &Path) -> OutputResult<()> {
    write_records(history, HISTORY_FIELDS, path)?;
    info!(rows = history.len(), path = %path.display(), "market history saved");
    Ok(())
}

/// Write merged market stats rows.
///
/// # Errors
///
/// Returns [`OutputError`] on filesystem or serialization failure.
pub fn write_stats_csv(rows: &[MarketStatsRow], path: &Path) -> OutputResult<()> {
    write_rows(rows, path)?;
    info!(rows = rows.len(), path = %path.display(), "market stats saved");
    Ok(())
}

/// Write stats rows augmented with Jita reference prices.
///
/// # Errors
///
/// Returns [`OutputError`] on filesystem or serialization failure.
pub fn write_jita_csv(rows: &[JitaPriceRow], path: &Path) -> OutputResult<()> {
    write_rows(rows, path)?;
    info!(rows = rows.len(), path = %path.display(), "Jita price comparison saved");
    Ok(())
}
