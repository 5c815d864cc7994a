//! # Till Store
//!
//! Local persistence for Till. Provides a trait-based interface over the
//! mutation log, the replica tables and the sync cursor, with SQLite and
//! in-memory implementations.
//!
//! ## Overview
//!
//! The store abstracts persistence behind the [`Store`] trait, allowing the
//! sync engine to be storage-agnostic. The primary implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`LogCounts`] - Aggregate pending/error counts for status indicators
//! - [`ApplyReport`] - Result of applying one pull batch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use till_core::{MutationPayload, now_millis};
//! use till_store::{SqliteStore, Store};
//!
//! async fn example() -> till_store::Result<()> {
//!     // Open a SQLite database (runs migrations)
//!     let store = SqliteStore::open("till.db")?;
//!
//!     let payload = MutationPayload::InventoryAdjustment {
//!         product_id: "p1".into(),
//!         delta: 12,
//!         reason: Some("delivery".into()),
//!     };
//!     let id = store.enqueue(&payload, now_millis()).await?;
//!     assert!(store.get_mutation(&id).await?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Durable enqueue**: a record is on disk before `enqueue` returns
//! - **All-or-nothing writes**: sales, returns and pull batches commit in
//!   one transaction each
//! - **Monotonic cursor**: `last_pulled_at` only ever moves forward

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ApplyReport, LogCounts, Store, StoreExt};
