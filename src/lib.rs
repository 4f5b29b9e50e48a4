//! # ESI Market Tools
//!
//! Library for downloading EVE Online market data from the ESI API:
//! structure market orders, regional market history, and reference
//! pricing, exported to CSV for spreadsheet analysis.
//!
//! ## Features
//!
//! - **Rate Limiting**: Token-bucket limiter shared by every outbound request
//! - **Conditional Caching**: ETag / Last-Modified validators turn unchanged
//!   history responses into `304 Not Modified` cache hits
//! - **Retry with Backoff**: Exponential backoff per page/type, bounded by a
//!   configurable retry limit
//! - **Error-Budget Awareness**: Honors the server's error-limit headers to
//!   stay clear of temporary bans
//!
//! ## Architecture
//!
//! - [`client`] - ESI fetch engine, rate limiter, and fetch outcome
//! - [`cache`] - Conditional-request cache persisted as a JSON file
//! - [`stats`] - Pure market-data aggregation
//! - [`jita`] - Reference pricing from the Fuzzwork aggregates API
//! - [`output`] - CSV export writers
//! - [`config`] - TOML configuration
//! - [`auth`] - Bearer-token plumbing for authenticated endpoints
//!
//! ## Quick Start
//!
//! ```no_run
//! use esi_market_tools::auth::AccessToken;
//! use esi_market_tools::client::esi::{EsiClient, EsiClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let token = AccessToken::new("bearer-token", 0);
//! let client = EsiClient::new(EsiClientConfig::default(), token)?;
//!
//! let outcome = client.fetch_market_orders(1035466617946).await;
//! println!(
//!     "{} orders over {} pages ({} errors)",
//!     outcome.records.len(),
//!     outcome.pages_fetched,
//!     outcome.error_count
//! );
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Bearer-token plumbing for authenticated ESI endpoints
pub mod auth;

/// Conditional-request cache for market history
pub mod cache;

/// CLI command implementations
pub mod cli;

/// ESI fetch engine, rate limiter, and fetch outcome
pub mod client;

/// Configuration loading and validation
pub mod config;

/// Jita reference pricing from the Fuzzwork aggregates API
pub mod jita;

/// Data output writers
pub mod output;

/// Pure market-data aggregation
pub mod stats;

/// EVE type id.
pub type TypeId = i64;

/// One market order or history row as returned by the API: an open-ended
/// field mapping rather than a fixed struct, so schema additions upstream
/// pass through untouched.
pub type Record = serde_json::Map<String, serde_json::Value>;

// Re-export commonly used types
pub use cache::HistoryCache;
pub use client::esi::EsiClient;
pub use client::outcome::FetchOutcome;
pub use client::rate_limit::RateLimiter;
