//! Error types for journal storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal is already owned by another queue.
    #[error("journal is locked by another owner: {0}")]
    Locked(String),

    /// The journal contents are corrupted.
    #[error("journal corrupted: {0}")]
    Corrupted(String),

    /// Writes are refused (read-only or failing backend).
    #[error("journal is not writable: {0}")]
    NotWritable(String),
}
