//! Data output writers.

/// CSV export
pub mod csv;

/// Errors that can occur while writing output
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
