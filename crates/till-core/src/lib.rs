//! # Till Core
//!
//! Pure domain types for the Till offline-first point-of-sale engine:
//! replica entities, mutation records, the payload codec and validation.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`MutationRecord`] - A locally originated change awaiting acknowledgment
//! - [`MutationPayload`] - Tagged, fixed-schema body of a mutation
//! - [`MutationStatus`] - `pending → syncing → synced | error`
//! - [`Entity`] - A replica row (product, customer, inventory line, sale)
//! - [`EntityChange`] - A server change applied by last-write-wins
//!
//! ## Storage Encoding
//!
//! Payloads are stored as CBOR. See [`codec`] module.

pub mod codec;
pub mod entity;
pub mod error;
pub mod mutation;
pub mod time;
pub mod types;
pub mod validation;

pub use codec::{decode_items, decode_payload, encode_items, encode_payload};
pub use entity::{
    lww_should_apply, ChangeOp, Customer, Entity, EntityChange, InventoryLine, Product, Sale,
    SaleItem,
};
pub use error::{CoreError, ValidationError};
pub use mutation::{
    FailureClass, MutationFailure, MutationKind, MutationPayload, MutationRecord, MutationStatus,
};
pub use time::{now_millis, Clock, ManualClock, SystemClock};
pub use types::{EntityId, EntityKind, EntityRef, MutationId};
pub use validation::validate_payload;
