//! Error types for the indices engine.

use grid_store::StoreError;
use thiserror::Error;

/// Errors that abort a run or fail a chunk.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid configuration, unknown index or malformed input file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Inputs are inconsistent (short baseline, coordinate mismatch, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// A memory estimate exceeds its limit.
    #[error("resource limit exceeded: {what} needs {required_mb} MB, limit is {limit_mb} MB")]
    Resource {
        what: String,
        required_mb: u64,
        limit_mb: u64,
    },

    /// Store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// Filesystem error outside the store layer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to build a worker pool.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl EngineError {
    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a Validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a Resource error from byte counts.
    pub fn resource(what: impl Into<String>, required_bytes: u64, limit_bytes: u64) -> Self {
        Self::Resource {
            what: what.into(),
            required_mb: required_bytes.div_ceil(1024 * 1024),
            limit_mb: limit_bytes / (1024 * 1024),
        }
    }

    /// True when the run must stop rather than record a failed chunk.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Cancelled | Self::ThreadPool(_) => true,
            Self::Store(e) => e.is_not_found(),
            Self::Resource { .. } | Self::Io(_) => false,
        }
    }
}

/// Errors from a single index computation. Recovered by omitting the index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A required input variable is not available.
    #[error("index '{index}' requires variable '{input}'")]
    MissingInput { index: String, input: String },

    /// A required percentile threshold is not available.
    #[error("index '{index}' requires threshold '{threshold}'")]
    MissingThreshold { index: String, threshold: String },

    /// Input units are not the ones the formula expects.
    #[error("index '{index}' expects {expected} for '{input}', got '{actual}'")]
    Units {
        index: String,
        input: String,
        expected: String,
        actual: String,
    },

    /// The formula cannot be evaluated on the given data.
    #[error("index '{index}': {message}")]
    Domain { index: String, message: String },

    /// Reading an input failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::config("x").is_fatal());
        assert!(EngineError::validation("x").is_fatal());
        assert!(!EngineError::resource("tile", 10, 5).is_fatal());

        let not_found = EngineError::from(StoreError::NotFound {
            group: "temperature".to_string(),
            tried: vec![PathBuf::from("/a")],
        });
        assert!(not_found.is_fatal());
        assert!(!EngineError::from(StoreError::write_failed("disk full")).is_fatal());
    }

    #[test]
    fn test_resource_message_in_mb() {
        let err = EngineError::resource("tile", 3 * 1024 * 1024 + 1, 2 * 1024 * 1024);
        assert_eq!(
            err.to_string(),
            "resource limit exceeded: tile needs 4 MB, limit is 2 MB"
        );
    }
}
