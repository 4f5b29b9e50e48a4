//! ESI client: fetch engine, rate limiting, and per-call outcomes.

/// ESI HTTP fetch engine
pub mod esi;

/// Fetch outcome accumulator
pub mod outcome;

/// Token-bucket rate limiting
pub mod rate_limit;

pub use esi::{ConnectivityReport, EsiClient, EsiClientConfig};
pub use outcome::FetchOutcome;
pub use rate_limit::RateLimiter;

/// Errors that can occur while talking to ESI. Transient fetch-level
/// problems never surface here; they are recovered inside the engine and
/// reported through [`FetchOutcome`] counters.
#[derive(Debug, thiserror::Error)]
pub enum EsiError {
    /// HTTP client construction or transport error
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type for ESI operations
pub type EsiResult<T> = Result<T, EsiError>;
