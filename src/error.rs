//! Error types for the service

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Import error
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Lock coordination error
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The requested symbol is not in the supported set
    #[error("Unsupported symbol: {0}")]
    UnsupportedSymbol(String),

    /// No data exists for the requested symbol or period
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input failed validation (malformed ticker, empty series, mixed symbols)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Client exhausted its token bucket
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable label for metrics and structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Storage(_) => "storage",
            Error::Import(_) => "import",
            Error::Lock(_) => "lock",
            Error::UnsupportedSymbol(_) => "unsupported_symbol",
            Error::NotFound(_) => "not_found",
            Error::InvalidData(_) => "invalid_data",
            Error::RateLimitExceeded(_) => "rate_limited",
            Error::Configuration(_) => "configuration",
            Error::Io(_) => "io",
        }
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Ingestion errors
#[derive(Error, Debug)]
pub enum ImportError {
    /// Import directory does not exist
    #[error("Import directory does not exist: {0}")]
    DirectoryMissing(PathBuf),

    /// Import path exists but is not a directory
    #[error("Import path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Import directory cannot be read
    #[error("Import directory is not readable: {0}")]
    Unreadable(PathBuf),

    /// No CSV files found in the import directory
    #[error("No CSV files found in import directory: {0}")]
    NoCsvFiles(PathBuf),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV file could not be opened or read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Storage error during batch insert
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A spawned file task panicked or was cancelled
    #[error("Import task failed: {0}")]
    TaskFailed(String),
}

/// Lock coordination errors
#[derive(Error, Debug)]
pub enum LockError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock record could not be parsed
    #[error("Corrupted lock record: {0}")]
    Corrupted(String),

    /// Release was attempted for a lease this node no longer holds
    #[error("Lock not held: {0}")]
    NotHeld(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::NotFound("BTC".into()).kind(), "not_found");
        assert_eq!(Error::RateLimitExceeded("ip".into()).kind(), "rate_limited");
        let e: Error = LockError::NotHeld("importLock".into()).into();
        assert_eq!(e.kind(), "lock");
    }

    #[test]
    fn test_import_error_display() {
        let e = ImportError::NoCsvFiles(PathBuf::from("/data/prices"));
        assert!(e.to_string().contains("/data/prices"));
    }
}
