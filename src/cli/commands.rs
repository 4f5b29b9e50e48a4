//! Command implementations: wiring config, auth, client, stats, and
//! exporters together.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::auth::{EnvTokenSource, TokenSource};
use crate::cache::HistoryCache;
use crate::cli::{Cli, Commands};
use crate::client::esi::{EsiClient, EsiClientConfig};
use crate::client::rate_limit::RateLimiter;
use crate::config::{load_config, AppConfig};
use crate::output::csv as csv_out;
use crate::stats::HISTORY_WINDOW_DAYS;
use crate::{jita, stats, TypeId};

/// Execute the parsed command line.
///
/// # Errors
///
/// Returns an error when configuration, credentials, or the export stage
/// fail; fetch-level problems are recovered inside the engine and only
/// logged.
pub async fn run(cli: Cli) -> Result<()> {
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "no configuration file, using defaults");
        AppConfig::default()
    };

    match cli.command {
        Commands::Fetch => fetch(&config, cli.no_cache).await,
        Commands::Orders => orders(&config).await,
        Commands::History => history(&config, cli.no_cache).await,
        Commands::Check => check(&config).await,
    }
}

async fn build_client(config: &AppConfig, with_cache: bool) -> Result<EsiClient> {
    let token = EnvTokenSource
        .access_token()
        .await
        .context("an ESI access token is required")?;

    let client_config = EsiClientConfig {
        base_url: config.esi.base_url.clone(),
        user_agent: config.user_agent.format_header(),
        max_retries: config.rate_limiting.max_retries,
        retry_delay: config.rate_limiting.retry_delay(),
        backoff_factor: config.rate_limiting.retry_backoff_factor,
    };

    let mut client = EsiClient::new(client_config, token)?.with_rate_limiter(RateLimiter::new(
        config.rate_limiting.burst_size,
        config.rate_limiting.tokens_per_second,
    ));

    if with_cache {
        let mut cache = HistoryCache::new(config.resolve_path(&config.paths.history_cache));
        cache.load();
        client = client.with_history_cache(cache);
    }

    Ok(client)
}

/// Read type ids from a CSV, accepting `type_ids`, `type_id`, or `typeID`
/// as the column header.
pub fn load_type_ids(path: &Path) -> Result<Vec<TypeId>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open type id list {}", path.display()))?;

    let headers = reader
        .headers()
        .context("type id CSV has no header row")?
        .clone();
    let column = ["type_ids", "type_id", "typeID"]
        .iter()
        .find_map(|name| headers.iter().position(|header| header == *name))
        .context("type id CSV needs a type_ids, type_id, or typeID column")?;

    let mut type_ids = Vec::new();
    for row in reader.records() {
        let row = row.context("failed to read type id row")?;
        let Some(field) = row.get(column) else {
            continue;
        };
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        type_ids.push(
            field
                .parse::<TypeId>()
                .with_context(|| format!("invalid type id '{field}'"))?,
        );
    }

    info!(types = type_ids.len(), path = %path.display(), "loaded type id list");
    Ok(type_ids)
}

async fn fetch(config: &AppConfig, no_cache: bool) -> Result<()> {
    let mut client = build_client(config, !no_cache).await?;
    let output_dir = config.resolve_path(&config.paths.output_dir);
    let type_ids = load_type_ids(&config.resolve_path(&config.paths.type_ids))?;

    let orders = client.fetch_market_orders(config.esi.structure_id).await;
    let history = client
        .fetch_market_history(config.esi.region_id, &type_ids)
        .await;
    client.save_cache();

    let tracked: BTreeSet<TypeId> = type_ids.iter().copied().collect();
    let filtered = stats::filter_orders(&tracked, &orders.records);
    let sell_stats = stats::aggregate_sell_orders(&filtered);
    let history_stats = stats::compute_history_stats(&history.records, HISTORY_WINDOW_DAYS);
    let type_names = client.fetch_type_names(&type_ids).await;
    let rows = stats::merge_market_stats(sell_stats, &history_stats, &type_names);

    let priced = match jita::fetch_jita_prices(client.http(), &type_ids).await {
        Ok(prices) => jita::apply_jita_prices(&rows, &prices),
        Err(e) => {
            warn!(error = %e, "reference pricing unavailable, exporting unpriced rows");
            jita::apply_jita_prices(&rows, &Default::default())
        }
    };

    csv_out::write_orders_csv(
        &orders.records,
        &csv_out::timestamped_path(&output_dir, "marketorders"),
    )?;
    csv_out::write_history_csv(
        &history.records,
        &csv_out::timestamped_path(&output_dir, "markethistory"),
    )?;
    csv_out::write_stats_csv(
        &rows,
        &csv_out::timestamped_path(&output_dir, "marketstats"),
    )?;
    csv_out::write_jita_csv(&priced, &output_dir.join("jita_prices.csv"))?;

    info!(
        orders = orders.records.len(),
        history_records = history.records.len(),
        stats_rows = rows.len(),
        cache_hits = history.cache_hits,
        errors = orders.error_count + history.error_count,
        "pipeline complete"
    );
    Ok(())
}

async fn orders(config: &AppConfig) -> Result<()> {
    let client = build_client(config, false).await?;
    let output_dir = config.resolve_path(&config.paths.output_dir);

    let outcome = client.fetch_market_orders(config.esi.structure_id).await;
    csv_out::write_orders_csv(
        &outcome.records,
        &csv_out::timestamped_path(&output_dir, "marketorders"),
    )?;
    Ok(())
}

async fn history(config: &AppConfig, no_cache: bool) -> Result<()> {
    let mut client = build_client(config, !no_cache).await?;
    let output_dir = config.resolve_path(&config.paths.output_dir);
    let type_ids = load_type_ids(&config.resolve_path(&config.paths.type_ids))?;

    let outcome = client
        .fetch_market_history(config.esi.region_id, &type_ids)
        .await;
    client.save_cache();

    csv_out::write_history_csv(
        &outcome.records,
        &csv_out::timestamped_path(&output_dir, "markethistory"),
    )?;
    Ok(())
}

async fn check(config: &AppConfig) -> Result<()> {
    let client = build_client(config, false).await?;
    let report = client.test_connectivity(config.esi.structure_id).await;

    if report.success {
        info!(
            orders_on_page_1 = report.order_count,
            total_pages = report.total_pages,
            "ESI connectivity OK"
        );
        Ok(())
    } else {
        anyhow::bail!(
            "connectivity check failed: {}",
            report.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
