//! Conditional-request cache for market history.
//!
//! Stores the ETag / Last-Modified validators and the response records
//! for each type id, persisted as a single JSON file. On later runs the
//! validators are replayed as `If-None-Match` / `If-Modified-Since`
//! headers so unchanged history comes back as a cheap `304 Not Modified`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Record, TypeId};

/// Errors that can occur while persisting the cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// Cache contents could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One cached history response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entity-tag validator; empty when the server sent none.
    #[serde(default)]
    pub etag: String,
    /// Last-Modified validator; empty when the server sent none.
    #[serde(default)]
    pub last_modified: String,
    /// Cached records, already stamped with their type id.
    #[serde(default)]
    pub records: Vec<Record>,
}

/// JSON-file cache of market-history responses, keyed by type id.
///
/// Single-writer: one cache instance belongs to one client. Loading is
/// tolerant (a missing or corrupt file just starts an empty cache) and
/// saving is atomic (temp file in the target directory, then rename).
#[derive(Debug)]
pub struct HistoryCache {
    path: PathBuf,
    entries: BTreeMap<TypeId, CacheEntry>,
}

impl HistoryCache {
    /// Create an empty cache backed by the given file path. Call
    /// [`load`](Self::load) to pick up a previous run's entries.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached entries, degraded ones included.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Load entries from disk.
    ///
    /// A missing file leaves the cache unchanged; unreadable or malformed
    /// contents reset it to empty. Neither is an error: the cache is an
    /// optimization, and the worst case is a full re-download.
    pub fn load(&mut self) {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no cache file, starting fresh");
            return;
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read cache file, starting fresh");
                self.entries.clear();
                return;
            }
        };

        match serde_json::from_str::<BTreeMap<TypeId, CacheEntry>>(&contents) {
            Ok(entries) => {
                self.entries = entries;
                info!(
                    entries = self.entries.len(),
                    path = %self.path.display(),
                    "loaded history cache"
                );
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt cache file, starting fresh");
                self.entries.clear();
            }
        }
    }

    /// Write all entries to disk atomically.
    ///
    /// The contents are written to a temporary file in the same directory,
    /// fsynced, then renamed over the destination so a crash never leaves
    /// a half-written cache behind. Parent directories are created as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on filesystem or serialization failure.
    pub fn save(&self) -> Result<(), CacheError> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| CacheError::Io(e.to_string()))?;

        let json = serde_json::to_string(&self.entries)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut temp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| CacheError::Io(e.to_string()))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| CacheError::Io(e.to_string()))?;
        temp.flush().map_err(|e| CacheError::Io(e.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| CacheError::Io(e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| CacheError::Io(e.to_string()))?;

        // Make the rename itself durable.
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        info!(
            entries = self.entries.len(),
            path = %self.path.display(),
            "saved history cache"
        );
        Ok(())
    }

    /// The cached entry for a type id, if any.
    pub fn get(&self, type_id: TypeId) -> Option<&CacheEntry> {
        self.entries.get(&type_id)
    }

    /// Insert or replace the entry for a type id.
    pub fn put(
        &mut self,
        type_id: TypeId,
        etag: impl Into<String>,
        last_modified: impl Into<String>,
        records: Vec<Record>,
    ) {
        self.entries.insert(
            type_id,
            CacheEntry {
                etag: etag.into(),
                last_modified: last_modified.into(),
                records,
            },
        );
    }

    /// True when the entry exists and holds at least one record.
    pub fn has_data(&self, type_id: TypeId) -> bool {
        self.entries
            .get(&type_id)
            .is_some_and(|entry| !entry.records.is_empty())
    }

    /// Build `If-None-Match` / `If-Modified-Since` headers for a type id.
    ///
    /// Returns an empty map when no entry exists, or when the entry has
    /// validators but no records. Trusting such a degraded entry would let
    /// the server confirm "not modified" against data we do not actually
    /// hold, trapping the type in a permanently-empty state.
    pub fn get_conditional_headers(&self, type_id: TypeId) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(entry) = self.entries.get(&type_id) else {
            return headers;
        };
        if entry.records.is_empty() {
            return headers;
        }

        if !entry.etag.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&entry.etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        if !entry.last_modified.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&entry.last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }
        headers
    }
}
