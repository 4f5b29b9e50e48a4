//! CLI argument definitions and command dispatch.

/// Command implementations
pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Structure market data downloader for EVE Online's ESI API
#[derive(Debug, Parser)]
#[command(name = "esi-market", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// Disable the conditional-request history cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full pipeline: orders, history, stats, reference prices, CSV export
    Fetch,

    /// Fetch market orders for the configured structure
    Orders,

    /// Fetch market history for the configured region
    History,

    /// Probe ESI connectivity against the configured structure
    Check,
}
