//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key contains characters the store cannot represent.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The store cannot be reached right now.
    #[error("storage unavailable")]
    Unavailable,
}
