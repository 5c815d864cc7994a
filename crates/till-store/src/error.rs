//! Error types for the store module.

use thiserror::Error;

use till_core::{CoreError, EntityId, EntityKind, MutationId, MutationStatus};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A replica row referenced by a local write does not exist.
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: EntityId },

    /// Mutation not found (for operations that require one).
    #[error("mutation not found: {0}")]
    MutationNotFound(MutationId),

    /// The record's status forbids the requested transition.
    #[error("mutation {id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        id: MutationId,
        from: MutationStatus,
        to: MutationStatus,
    },

    /// The operation needs the record in another status.
    #[error("mutation {id} is {actual}, expected {expected}")]
    WrongStatus {
        id: MutationId,
        expected: MutationStatus,
        actual: MutationStatus,
    },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the underlying store failed to commit (the `StorageError` case).
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_) | StoreError::Io(_) | StoreError::Migration(_)
        )
    }
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::EncodingError(msg) | CoreError::DecodingError(msg) => {
                StoreError::Serialization(msg)
            }
            other => StoreError::InvalidData(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
