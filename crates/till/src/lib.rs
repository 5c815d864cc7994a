//! # Till
//!
//! The unified API for an offline-first point-of-sale register: record
//! sales, returns and stock changes locally, and keep them in sync with
//! the server.
//!
//! ## Overview
//!
//! - **Write path**: every local write commits the replica change and
//!   then enqueues a durable mutation; failures leave nothing behind
//! - **Mutation log**: pending work survives restarts; failed records can
//!   be discarded, amended or resubmitted
//! - **Sync**: a background worker pushes the log in order and pulls
//!   server changes by last-write-wins
//!
//! ## Key Concepts
//!
//! - **Mutation**: one locally originated change, pushed with its id as
//!   idempotency key
//! - **Replica**: the local copy of products, customers, inventory and sales
//! - **Cursor**: server timestamp of the last completed pull
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use till::{SaleItem, Till, TillConfig};
//! use till::sync::{MemoryServer, MemoryTransport, StaticAuth, StaticConnectivity};
//!
//! async fn example() -> till::Result<()> {
//!     let mut till = Till::open(
//!         "till.db",
//!         MemoryTransport::new(MemoryServer::new()),
//!         Arc::new(StaticConnectivity::online()),
//!         Arc::new(StaticAuth::with_token("token")),
//!         TillConfig::default(),
//!     )?;
//!     till.start().await?;
//!
//!     let (sale, _mutation) = till
//!         .record_sale(None, vec![SaleItem::new("p1", 2, 450)])
//!         .await?;
//!     println!("sold {} ({})", sale.id, till.status());
//!
//!     till.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `till::core` - Domain types (MutationRecord, Entity, etc.)
//! - `till::store` - Storage abstraction and SQLite
//! - `till::sync` - Sync engine, transports and worker

pub mod config;
pub mod error;
pub mod register;

// Re-export component crates
pub use till_core as core;
pub use till_store as store;
pub use till_sync as sync;

// Re-export main types for convenience
pub use config::TillConfig;
pub use error::{Result, TillError};
pub use register::Till;

// Re-export commonly used types
pub use till_core::{
    Customer, Entity, EntityId, EntityKind, EntityRef, InventoryLine, MutationId,
    MutationPayload, MutationRecord, MutationStatus, Product, Sale, SaleItem,
};
pub use till_sync::{EngineState, SyncConfig, SyncOutcome, SyncReport, SyncStatus};
