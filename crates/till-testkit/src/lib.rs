//! # Till Testkit
//!
//! Testing utilities for Till.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Wire messages with their exact JSON, for server implementers
//! - **Generators**: Proptest strategies for payloads, items and timestamps
//! - **Fixtures**: An in-memory store and server seeded with the same catalog
//! - **Faults**: A store wrapper that fails chosen operations on demand
//!
//! ## Golden Vectors
//!
//! Every vector must encode to, and decode from, its JSON:
//!
//! ```rust
//! use till_testkit::vectors::{push_request_vectors, verify};
//!
//! for vector in push_request_vectors() {
//!     verify(&vector).unwrap();
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use till_testkit::generators::mutation_payload;
//!
//! proptest! {
//!     #[test]
//!     fn payloads_have_targets(payload in mutation_payload()) {
//!         prop_assert!(!payload.targets().is_empty());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use till_sync::SyncConfig;
//! use till_testkit::fixtures::TestFixture;
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     fixture.stock("p1", 10).await.unwrap();
//!     let engine = fixture.engine(SyncConfig::default());
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use faults::FaultyStore;
pub use fixtures::{inventory, item, product, TestFixture, START_MILLIS};
