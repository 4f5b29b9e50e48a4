//! Main entry point for the esi-market CLI.

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use esi_market_tools::cli::{commands, Cli};

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("esi_market_tools=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli).await {
        error!("Command failed: {e:#}");
        std::process::exit(1);
    }
}
