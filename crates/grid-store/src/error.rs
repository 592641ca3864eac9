//! Error types for store access.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while discovering, reading or writing stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No store was found for a group at any candidate location.
    #[error("no store found for group '{group}'; tried: {}", format_paths(.tried))]
    NotFound { group: String, tried: Vec<PathBuf> },

    /// Failed to open a Zarr group or array.
    #[error("failed to open store: {0}")]
    OpenFailed(String),

    /// Failed to read data from an array.
    #[error("failed to read store data: {0}")]
    ReadFailed(String),

    /// Failed to write or commit an archive.
    #[error("failed to write archive: {0}")]
    WriteFailed(String),

    /// Invalid or missing metadata in a store.
    #[error("invalid store metadata: {0}")]
    InvalidMetadata(String),

    /// A variable was requested that the dataset does not contain.
    #[error("variable '{variable}' not found in {path}")]
    MissingVariable { variable: String, path: String },

    /// Two grids that must share coordinates do not.
    #[error("coordinate mismatch: {0}")]
    CoordinateMismatch(String),

    /// A requested time selection has no overlap with the store.
    #[error("time selection {start}..={end} is outside store range {available}")]
    EmptySelection {
        start: String,
        end: String,
        available: String,
    },

    /// Units cannot be converted to the requested canonical units.
    #[error("cannot convert units '{from}' to '{to}'")]
    UnitConversion { from: String, to: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Filesystem error.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Create an OpenFailed error.
    pub fn open_failed(msg: impl Into<String>) -> Self {
        Self::OpenFailed(msg.into())
    }

    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Create a WriteFailed error.
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// True for discovery failures that should abort a whole run.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_every_path() {
        let err = StoreError::NotFound {
            group: "temperature".to_string(),
            tried: vec![
                PathBuf::from("/data/temperature.zarr"),
                PathBuf::from("/data/temperature/temperature.zarr"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("'temperature'"));
        assert!(msg.contains("/data/temperature.zarr"));
        assert!(msg.contains("/data/temperature/temperature.zarr"));
        assert!(err.is_not_found());
    }
}
