//! Error types for the sync engine.

use offsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Per-message validation problems are never errors; they are reported
/// as [`crate::RejectionReason`]s in the send result.
#[derive(Error, Debug)]
pub enum SyncError {
    /// More messages survived validation than the caller said it would send.
    #[error("batch too large: {accepted} accepted messages exceed requested batch size {requested}")]
    BatchTooLarge {
        /// Batch size the caller requested.
        requested: usize,
        /// Number of drafts that passed validation.
        accepted: usize,
    },

    /// No authenticated session exists.
    #[error("no active session")]
    NoSession,

    /// No remote handle is attached.
    #[error("no remote attached")]
    NoRemote,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote answered with something we could not decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote procedure reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// Invalid configuration input.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persisted state could not be decoded.
    #[error("corrupt persisted state under '{key}': {message}")]
    Corrupt {
        /// Store key that held the bytes.
        key: String,
        /// Decoder message.
        message: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Remote(_) => true,
            SyncError::Protocol(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error was raised before anything reached the
    /// network.
    pub fn is_precondition(&self) -> bool {
        matches!(self, SyncError::NoSession | SyncError::NoRemote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Remote("internal error".into()).is_retryable());
        assert!(!SyncError::NoSession.is_retryable());
        assert!(!SyncError::BatchTooLarge {
            requested: 1,
            accepted: 2
        }
        .is_retryable());
    }

    #[test]
    fn preconditions() {
        assert!(SyncError::NoSession.is_precondition());
        assert!(SyncError::NoRemote.is_precondition());
        assert!(!SyncError::Protocol("x".into()).is_precondition());
    }

    #[test]
    fn error_display() {
        let err = SyncError::BatchTooLarge {
            requested: 2,
            accepted: 3,
        };
        assert!(err.to_string().contains("batch too large"));
        assert_eq!(SyncError::NoSession.to_string(), "no active session");
    }
}
