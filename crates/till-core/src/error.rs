//! Error types for Till core.

use thiserror::Error;

use crate::mutation::MutationStatus;

/// Core errors that can occur while handling records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: MutationStatus,
        to: MutationStatus,
    },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for payloads before they are written locally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a {0} needs at least one item")]
    NoItems(&'static str),

    #[error("item {index} has non-positive quantity {quantity}")]
    NonPositiveQuantity { index: usize, quantity: i64 },

    #[error("item {index} has negative unit price {price}")]
    NegativePrice { index: usize, price: i64 },

    #[error("total {total} does not match item sum {expected}")]
    TotalMismatch { total: i64, expected: i64 },

    #[error("inventory adjustment delta must be non-zero")]
    ZeroDelta,

    #[error("empty entity id")]
    EmptyId,
}
