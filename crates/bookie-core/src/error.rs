//! Error types for bookie storage operations
//!
//! Every failure the write path can report is a `StorageError`. The enum is
//! `Clone` because a single sync outcome is delivered to every completion in
//! a batch, and each completion may be awaited by several threads.

use std::path::PathBuf;

use thiserror::Error;

/// Storage error types with detailed context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", path_suffix(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Journal file is corrupted and cannot be recovered
    #[error("journal corrupted in {} at offset {offset}: {reason}", .path.display())]
    JournalCorrupted {
        /// Path to the corrupted journal file
        path: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// Checksum verification failed
    #[error("checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
        offset: u64,
    },

    /// Entry payload exceeds the configured maximum
    #[error("entry value too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry { entry_size: u64, max_size: u64 },

    /// The engine rejected a write; the entry was never queued for sync
    #[error("failed to apply entry ({ledger_id}, {entry_id}): {reason}")]
    ApplyFailed {
        ledger_id: i64,
        entry_id: i64,
        reason: String,
    },

    /// The journal sync covering a batch of entries failed
    #[error("journal sync failed for a batch of {batch_size} entries: {reason}")]
    SyncFailed { batch_size: usize, reason: String },

    /// The write path stopped before the entry was known to be durable
    #[error("storage is shutting down; entry durability unknown")]
    ShuttingDown,

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

impl StorageError {
    /// Wrap an `io::Error` with the file it concerns.
    pub fn io_at(path: impl Into<PathBuf>, err: &std::io::Error, what: &str) -> Self {
        StorageError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::ChecksumMismatch {
            path: PathBuf::from("/tmp/journal-0.log"),
            expected: 0x12345678,
            actual: 0x87654321,
            offset: 1024,
        };

        let display = err.to_string();
        assert!(display.contains("checksum mismatch"));
        assert!(display.contains("0x12345678"));
        assert!(display.contains("0x87654321"));
    }

    #[test]
    fn test_io_display_with_and_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let with_path = StorageError::io_at("/data/journal", &io_err, "open failed");
        assert!(with_path.to_string().contains("in /data/journal"));

        let without: StorageError = io_err.into();
        assert!(!without.to_string().contains(" in "));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StorageError = io_err.into();

        match err {
            StorageError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_errors_are_cloneable_for_fan_out() {
        let err = StorageError::SyncFailed { batch_size: 3, reason: "disk gone".into() };
        let copies: Vec<StorageError> = (0..3).map(|_| err.clone()).collect();
        assert!(copies.iter().all(|e| *e == err));
    }
}
