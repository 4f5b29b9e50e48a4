//! Per-call result aggregation for the fetch engine.

use std::collections::BTreeSet;

use crate::{Record, TypeId};

/// Accumulated records and statistics for one fetch call.
///
/// The engine mutates this in place while a fetch runs and returns it by
/// value when the call completes; transient errors never surface as `Err`,
/// only as counters here.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Retrieved records (freshly fetched and cache-adopted), in page/key order.
    pub records: Vec<Record>,
    /// Pages (bulk fetch) or per-type responses (history fetch) successfully processed.
    pub pages_fetched: u64,
    /// Error responses observed: non-success statuses, timeouts, and decode failures.
    pub error_count: u64,
    /// Retries performed across all pages and types.
    pub total_retries: u64,
    /// Wall-clock duration of the whole call, in seconds.
    pub elapsed_seconds: f64,
    /// Type ids that never produced a record during this call.
    pub failed_keys: BTreeSet<TypeId>,
    /// Types satisfied from the conditional cache via `304 Not Modified`.
    pub cache_hits: u64,
}

impl FetchOutcome {
    /// True when at least one error was observed or a key failed outright.
    pub fn has_errors(&self) -> bool {
        self.error_count > 0 || !self.failed_keys.is_empty()
    }
}
