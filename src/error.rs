//! Error types for the pipeline stages

use std::path::PathBuf;

use thiserror::Error;

/// Result type used by the library stages
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by loading, reporting and persistence
///
/// Data-quality problems are never errors: the cleaner deletes offending rows
/// and counts them in its report.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A file could not be opened, created or written
    #[error("i/o failure on '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing/serialization or dataframe evaluation failed
    #[error("table operation failed: {0}")]
    Table(#[from] polars::prelude::PolarsError),

    /// A cleaned CSV row could not be interpreted
    #[error("malformed cleaned row {row}: {reason}")]
    MalformedRow {
        /// Zero-based row number
        row: usize,
        /// What was wrong
        reason: String,
    },

    /// The relational sink rejected the connection or bulk load
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// The TOML configuration file was unreadable or invalid
    #[error("invalid config '{path}': {source}")]
    Config {
        /// Config file
        path: PathBuf,
        /// Parser error
        #[source]
        source: toml::de::Error,
    },

    /// Chart rendering failed
    #[error("chart '{name}' failed: {reason}")]
    Chart {
        /// Chart file name
        name: String,
        /// Backend error text
        reason: String,
    },
}

impl PipelineError {
    /// Create an Io error for a path
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a MalformedRow error
    #[inline]
    pub fn malformed(row: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            row,
            reason: reason.into(),
        }
    }

    /// Create a Chart error
    #[inline]
    pub fn chart(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Chart {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
