//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Connectivity(String),

    /// The server refused our credentials.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Transport-level error (I/O, 5xx, throttling).
    #[error("transport error: {0}")]
    Transport(String),

    /// A network call did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server refused the request as invalid.
    #[error("rejected by server: {0}")]
    ServerRejected(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] till_store::StoreError),

    /// Sync was cancelled (logout or shutdown).
    #[error("sync cancelled")]
    Cancelled,

    /// A response could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The background worker has shut down.
    #[error("sync worker stopped")]
    WorkerStopped,
}

impl SyncError {
    /// Whether a later attempt with the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_)
                | SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::InvalidMessage(_)
        )
    }

    /// Errors that end the whole cycle rather than failing one batch.
    pub(crate) fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_)
                | SyncError::Auth(_)
                | SyncError::Cancelled
                | SyncError::Store(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
