//! Storage error types
//!
//! Defines all errors that can occur in the storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the persistent store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened or its schema bootstrapped
    #[error("Store unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// A write was rejected; nothing was committed
    #[error("Write failed: {0}")]
    Write(#[source] rusqlite::Error),

    /// A read failed
    #[error("Read failed: {0}")]
    Read(#[from] rusqlite::Error),

    /// A day slot outside the month was addressed
    #[error("Invalid day {day} for month {month}")]
    InvalidDay { month: String, day: u8 },

    /// A persisted value could not be interpreted
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Unavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::InvalidDay {
            month: "2024-02".to_string(),
            day: 30,
        };
        assert_eq!(err.to_string(), "Invalid day 30 for month 2024-02");

        let err = StoreError::unavailable("/tmp/w.db", "file is not a database");
        assert_eq!(
            err.to_string(),
            "Store unavailable at /tmp/w.db: file is not a database"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }
}
