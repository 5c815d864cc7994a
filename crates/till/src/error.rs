//! Error types for the Till API.

use thiserror::Error;
use till_core::{MutationId, ValidationError};
use till_store::StoreError;
use till_sync::SyncError;

/// Errors that can occur during Till operations.
#[derive(Debug, Error)]
pub enum TillError {
    /// The payload was refused before anything was written.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// An amended payload must keep the kind of the record it replaces.
    #[error("mutation {id} is a {expected}, not a {actual}")]
    KindMismatch {
        id: MutationId,
        expected: till_core::MutationKind,
        actual: till_core::MutationKind,
    },

    /// The background worker is already running.
    #[error("already started")]
    AlreadyStarted,
}

/// Result type for Till operations.
pub type Result<T> = std::result::Result<T, TillError>;
