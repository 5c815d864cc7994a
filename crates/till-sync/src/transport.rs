//! Transport abstraction for the push/pull exchange.
//!
//! The transport layer handles message serialization and delivery.
//! Implementations may use HTTP (see [`crate::http`]) or anything else
//! that can carry a [`PushRequest`] and a pull cursor.

use async_trait::async_trait;

use crate::connectivity::AuthToken;
use crate::error::Result;
use crate::messages::{PullResponse, PushRequest, PushResponse};

/// Transport trait for talking to the sync server.
///
/// Implementations must be thread-safe (Send + Sync). Errors are
/// classified by [`crate::SyncError`] variant: `Connectivity` when the
/// server is unreachable, `Auth` for refused credentials, `Transport` or
/// `Timeout` for everything retryable.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a batch of mutations. Returns one ack per mutation the server
    /// processed; missing acks are treated as failures.
    async fn push(&self, token: &AuthToken, request: &PushRequest) -> Result<PushResponse>;

    /// Fetch server changes since `since` (all changes when `None`).
    async fn pull(&self, token: &AuthToken, since: Option<i64>) -> Result<PullResponse>;
}

/// An in-memory server and transport for testing.
///
/// The server keeps the authoritative entity map, applies mutations
/// idempotently by id, and can be scripted to fail.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use till_core::{
        validate_payload, ChangeOp, Entity, EntityChange, EntityKind, EntityRef, InventoryLine,
        MutationId, MutationPayload, Sale, SaleItem,
    };

    use crate::error::SyncError;
    use crate::messages::{AckStatus, PushAck, WireMutation};

    /// A scripted failure for the next push or pull call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ScriptedFailure {
        /// Connection refused.
        Unreachable,
        /// 401.
        Unauthorized,
        /// 5xx.
        ServerError,
        /// Never answers; the caller's timeout or cancellation must fire.
        Hang,
    }

    impl ScriptedFailure {
        fn into_error(self) -> SyncError {
            match self {
                ScriptedFailure::Unreachable => SyncError::Connectivity("connection refused".into()),
                ScriptedFailure::Unauthorized => SyncError::Auth("401 unauthorized".into()),
                ScriptedFailure::ServerError | ScriptedFailure::Hang => {
                    SyncError::Transport("503 service unavailable".into())
                }
            }
        }
    }

    /// One authoritative row; `entity` is `None` once deleted.
    #[derive(Debug, Clone)]
    struct ServerRow {
        version: i64,
        entity: Option<Entity>,
    }

    #[derive(Debug, Default)]
    struct ServerState {
        rows: BTreeMap<EntityRef, ServerRow>,
        /// Idempotency set of applied mutation ids.
        applied: HashSet<MutationId>,
        /// Every id ever received, in arrival order.
        received: Vec<MutationId>,
        clock: i64,
        token: Option<String>,
        online: bool,
        push_failures: VecDeque<ScriptedFailure>,
        pull_failures: VecDeque<ScriptedFailure>,
        /// Per-mutation ack overrides.
        overrides: HashMap<MutationId, (AckStatus, String)>,
    }

    impl ServerState {
        fn tick(&mut self) -> i64 {
            self.clock += 1;
            self.clock
        }

        fn put(&mut self, entity: Entity) {
            let version = self.tick();
            self.rows.insert(
                entity.entity_ref(),
                ServerRow {
                    version,
                    entity: Some(entity),
                },
            );
        }

        fn inventory(&self, product_id: &till_core::EntityId) -> Option<&InventoryLine> {
            match self
                .rows
                .get(&EntityRef::inventory(product_id.clone()))
                .and_then(|row| row.entity.as_ref())
            {
                Some(Entity::Inventory(line)) => Some(line),
                _ => None,
            }
        }

        fn bump(&mut self, items: &[SaleItem], sign: i64) {
            for item in items {
                if let Some(mut line) = self.inventory(&item.product_id).cloned() {
                    line.quantity += sign * item.quantity;
                    line.updated_at = self.clock + 1;
                    self.put(Entity::Inventory(line));
                }
            }
        }

        /// Check a mutation against server state. `Err` is the rejection reason.
        fn check(&self, payload: &MutationPayload) -> std::result::Result<(), String> {
            validate_payload(payload).map_err(|e| e.to_string())?;
            let items: &[SaleItem] = match payload {
                MutationPayload::Sale { items, .. } => items,
                MutationPayload::Return { sale_id, items, .. } => {
                    let target = EntityRef::sale(sale_id.clone());
                    if !self.rows.get(&target).is_some_and(|r| r.entity.is_some()) {
                        return Err(format!("unknown sale {}", sale_id));
                    }
                    items
                }
                MutationPayload::InventoryAdjustment { product_id, .. } => {
                    if self.inventory(product_id).is_none() {
                        return Err(format!("unknown product {}", product_id));
                    }
                    return Ok(());
                }
            };
            for item in items {
                if self.inventory(&item.product_id).is_none() {
                    return Err(format!("unknown product {}", item.product_id));
                }
            }
            Ok(())
        }

        fn apply(&mut self, mutation: &WireMutation) {
            match &mutation.payload {
                MutationPayload::Sale {
                    sale_id,
                    customer_id,
                    items,
                    ..
                } => {
                    self.bump(items, -1);
                    let now = self.clock + 1;
                    let sale = Sale::new(sale_id.clone(), customer_id.clone(), items.clone(), now);
                    self.put(Entity::Sale(sale));
                }
                MutationPayload::Return { items, .. } => self.bump(items, 1),
                MutationPayload::InventoryAdjustment {
                    product_id, delta, ..
                } => {
                    if let Some(mut line) = self.inventory(product_id).cloned() {
                        line.quantity += delta;
                        line.updated_at = self.clock + 1;
                        self.put(Entity::Inventory(line));
                    }
                }
            }
        }

        fn push(&mut self, mutation: &WireMutation) -> PushAck {
            self.received.push(mutation.id);
            if let Some((status, reason)) = self.overrides.get(&mutation.id) {
                return PushAck::new(mutation.id, *status).with_reason(reason.clone());
            }
            if self.applied.contains(&mutation.id) {
                return PushAck::new(mutation.id, AckStatus::Duplicate);
            }
            if let Err(reason) = self.check(&mutation.payload) {
                return PushAck::new(mutation.id, AckStatus::Rejected).with_reason(reason);
            }
            self.apply(mutation);
            self.applied.insert(mutation.id);
            PushAck::new(mutation.id, AckStatus::Accepted)
        }

        fn changes_since(&self, since: Option<i64>) -> Vec<EntityChange> {
            let mut changes: Vec<_> = self
                .rows
                .iter()
                .filter(|(_, row)| since.map_or(true, |since| row.version > since))
                .map(|(target, row)| EntityChange {
                    version: row.version,
                    op: match &row.entity {
                        Some(entity) => ChangeOp::Upsert(entity.clone()),
                        None => ChangeOp::Delete(target.clone()),
                    },
                })
                .collect();
            changes.sort_by_key(|change| change.version);
            changes
        }
    }

    /// The authoritative side of the exchange.
    #[derive(Debug)]
    pub struct MemoryServer {
        state: Mutex<ServerState>,
    }

    impl MemoryServer {
        /// A server that accepts any token and is online.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(ServerState {
                    online: true,
                    ..ServerState::default()
                }),
            })
        }

        fn state(&self) -> MutexGuard<'_, ServerState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Require this bearer token on every call.
        pub fn require_token(&self, token: impl Into<String>) {
            self.state().token = Some(token.into());
        }

        pub fn set_online(&self, online: bool) {
            self.state().online = online;
        }

        /// Current server time.
        pub fn now(&self) -> i64 {
            self.state().clock
        }

        /// Move the server clock; it never goes back.
        pub fn set_time(&self, now: i64) {
            let mut state = self.state();
            state.clock = state.clock.max(now);
        }

        /// Insert or replace an authoritative row.
        pub fn put_entity(&self, entity: Entity) {
            self.state().put(entity);
        }

        /// Delete an authoritative row.
        pub fn delete_entity(&self, target: EntityRef) {
            let mut state = self.state();
            let version = state.tick();
            state.rows.insert(
                target,
                ServerRow {
                    version,
                    entity: None,
                },
            );
        }

        pub fn entity(&self, target: &EntityRef) -> Option<Entity> {
            self.state()
                .rows
                .get(target)
                .and_then(|row| row.entity.clone())
        }

        pub fn inventory_quantity(&self, product_id: &str) -> Option<i64> {
            self.state()
                .inventory(&product_id.into())
                .map(|line| line.quantity)
        }

        /// Number of rows of one kind.
        pub fn count(&self, kind: EntityKind) -> usize {
            self.state()
                .rows
                .iter()
                .filter(|(target, row)| target.kind == kind && row.entity.is_some())
                .count()
        }

        /// Mutation ids received so far, duplicates included.
        pub fn received(&self) -> Vec<MutationId> {
            self.state().received.clone()
        }

        pub fn was_applied(&self, id: &MutationId) -> bool {
            self.state().applied.contains(id)
        }

        /// Fail the next push call.
        pub fn fail_next_push(&self, failure: ScriptedFailure) {
            self.state().push_failures.push_back(failure);
        }

        /// Fail the next pull call.
        pub fn fail_next_pull(&self, failure: ScriptedFailure) {
            self.state().pull_failures.push_back(failure);
        }

        /// Always answer `status` for this mutation id.
        pub fn override_ack(&self, id: MutationId, status: AckStatus, reason: impl Into<String>) {
            self.state().overrides.insert(id, (status, reason.into()));
        }

        pub fn clear_override(&self, id: &MutationId) {
            self.state().overrides.remove(id);
        }

        /// Handle a push as the server would, ignoring scripted failures.
        pub fn handle_push(&self, request: &PushRequest) -> PushResponse {
            let mut state = self.state();
            let acks = request.changes.iter().map(|m| state.push(m)).collect();
            PushResponse { acks }
        }

        /// Handle a pull as the server would, ignoring scripted failures.
        pub fn handle_pull(&self, since: Option<i64>) -> PullResponse {
            let state = self.state();
            PullResponse {
                changes: state.changes_since(since),
                timestamp: state.clock,
            }
        }

        /// Gate shared by push and pull: connectivity, auth, scripted failures.
        fn admit(&self, token: &AuthToken, push: bool) -> std::result::Result<(), ScriptedFailure> {
            let mut state = self.state();
            if !state.online {
                return Err(ScriptedFailure::Unreachable);
            }
            if let Some(expected) = &state.token {
                if expected != token.as_str() {
                    return Err(ScriptedFailure::Unauthorized);
                }
            }
            let scripted = if push {
                state.push_failures.pop_front()
            } else {
                state.pull_failures.pop_front()
            };
            match scripted {
                Some(failure) => Err(failure),
                None => Ok(()),
            }
        }
    }

    /// Client-side handle onto a [`MemoryServer`].
    #[derive(Debug, Clone)]
    pub struct MemoryTransport {
        server: Arc<MemoryServer>,
    }

    impl MemoryTransport {
        pub fn new(server: Arc<MemoryServer>) -> Self {
            Self { server }
        }

        pub fn server(&self) -> &Arc<MemoryServer> {
            &self.server
        }
    }

    async fn fail(failure: ScriptedFailure) -> SyncError {
        if failure == ScriptedFailure::Hang {
            std::future::pending::<()>().await;
        }
        failure.into_error()
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn push(&self, token: &AuthToken, request: &PushRequest) -> Result<PushResponse> {
            if let Err(failure) = self.server.admit(token, true) {
                return Err(fail(failure).await);
            }
            Ok(self.server.handle_push(request))
        }

        async fn pull(&self, token: &AuthToken, since: Option<i64>) -> Result<PullResponse> {
            if let Err(failure) = self.server.admit(token, false) {
                return Err(fail(failure).await);
            }
            Ok(self.server.handle_pull(since))
        }
    }
}
