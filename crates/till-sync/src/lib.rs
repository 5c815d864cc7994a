//! # Till Sync
//!
//! Moves the local mutation log to the server and server changes into the
//! local replica.
//!
//! ## Overview
//!
//! One sync cycle pushes pending mutations in creation order, then pulls
//! every server change since the stored cursor and applies them by
//! last-write-wins together with the new cursor. The server deduplicates
//! mutations by id, so a record may be pushed any number of times.
//!
//! ## Key Properties
//!
//! - **Idempotent**: A record is removed only after the server acknowledged it
//! - **Ordered**: A later mutation of an entity is never sent before an earlier one
//! - **Atomic cursor**: The cursor moves only with the changes it covers
//! - **Bounded**: Every network call has a timeout and can be cancelled
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use till_store::SqliteStore;
//! use till_sync::{
//!     spawn_worker, MemoryServer, MemoryTransport, StaticAuth, StaticConnectivity,
//!     SyncConfig, SyncEngine,
//! };
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open("till.db")?);
//!     let transport = MemoryTransport::new(MemoryServer::new());
//!     let engine = Arc::new(SyncEngine::new(
//!         store,
//!         transport,
//!         Arc::new(StaticConnectivity::online()),
//!         Arc::new(StaticAuth::with_token("token")),
//!         SyncConfig::default(),
//!     ));
//!
//!     let worker = spawn_worker(engine.clone(), 16);
//!     worker.app_start();
//!     let outcome = worker.sync_now().await?;
//!     println!("{:?} ({})", outcome, engine.status());
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Exchange
//!
//! ```text
//! Client                              Server
//!   |-------- POST /sync {changes} --->|   push, batched
//!   |<------- {acks} ------------------|   accepted | duplicate | rejected | failed
//!   |-------- GET /sync?last_pulled_at>|   pull
//!   |<------- {changes, timestamp} ----|   cursor := timestamp
//! ```

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod http;
pub mod messages;
#[cfg(feature = "reqwest")]
pub mod reqwest_client;
pub mod status;
pub mod transport;
pub mod worker;

pub use backoff::{BackoffPolicy, CycleBackoff};
pub use cancel::CancelToken;
pub use config::SyncConfig;
pub use connectivity::{AuthProvider, AuthToken, ConnectivityMonitor, StaticAuth, StaticConnectivity};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use http::{HttpClient, HttpFailure, HttpRequest, HttpResponse, HttpTransport, Method};
#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestClient;
pub use messages::{limits, AckStatus, PullResponse, PushAck, PushRequest, PushResponse, WireMutation};
pub use status::{EngineState, SyncOutcome, SyncReport, SyncStatus, SyncTrigger};
pub use transport::{memory::MemoryServer, memory::MemoryTransport, memory::ScriptedFailure, Transport};
pub use worker::{spawn_worker, WorkerHandle};
