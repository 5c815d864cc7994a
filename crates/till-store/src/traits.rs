//! Store trait: the abstract interface for local persistence.
//!
//! One store instance is one local database: it owns the replica tables,
//! the mutation log and the sync cursor. Implementations include SQLite
//! (primary) and in-memory (for tests).

use async_trait::async_trait;
use till_core::{
    Entity, EntityChange, EntityId, EntityKind, EntityRef, InventoryLine, MutationFailure,
    MutationId, MutationPayload, MutationRecord, MutationStatus, Sale, SaleItem,
};

use crate::error::Result;

/// Aggregate view of the mutation log ("pending: N, errors: M").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounts {
    /// Records awaiting a push (pending or in flight).
    pub pending: usize,
    /// Records in `error`, retryable or not.
    pub errors: usize,
    /// Subset of `errors` the server rejected; these need the caller.
    pub rejected: usize,
}

impl LogCounts {
    pub fn total(&self) -> usize {
        self.pending + self.errors
    }
}

/// Result of applying one pull batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Changes written to the replica.
    pub applied: usize,
    /// Changes skipped because the local row was as new or newer.
    pub skipped: usize,
    /// The cursor after the batch committed.
    pub cursor: i64,
}

/// The Store trait: async interface for local persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Single writer**: every commit is serialized per instance, so a sync
///   cycle never observes a half-written sale.
/// - **Enqueue after commit**: callers commit the local write first and only
///   then enqueue the mutation describing it.
/// - **Forward-only log**: status changes are checked against
///   [`MutationStatus::can_transition_to`].
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Mutation Log
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a new `pending` record and return its id.
    ///
    /// The record is durable when this returns.
    async fn enqueue(&self, payload: &MutationPayload, now: i64) -> Result<MutationId>;

    /// Every record still awaiting acknowledgment, oldest first.
    ///
    /// Ordered by `(created_at, seq)`; creation order is causal order.
    async fn list_pending(&self) -> Result<Vec<MutationRecord>>;

    /// Get a record by id.
    async fn get_mutation(&self, id: &MutationId) -> Result<Option<MutationRecord>>;

    /// Move a record to `status`, optionally recording an error message.
    ///
    /// Idempotent; a no-op if the record no longer exists.
    async fn mark_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Record a failed push: status `error`, failure class, message,
    /// `attempt + 1` and the next retry time. No-op for unknown ids.
    async fn record_failure(&self, id: &MutationId, failure: &MutationFailure) -> Result<()>;

    /// Delete a `synced` record. Returns false if it was already gone.
    async fn remove(&self, id: &MutationId) -> Result<bool>;

    /// Record a server acknowledgment: `syncing -> synced -> removed` in
    /// one commit. Returns false if the record was already gone.
    async fn acknowledge(&self, id: &MutationId) -> Result<bool>;

    /// Drop an `error` record the caller gave up on.
    async fn discard(&self, id: &MutationId) -> Result<MutationRecord>;

    /// Replace the payload of an `error` record and queue it again.
    async fn amend(&self, id: &MutationId, payload: &MutationPayload) -> Result<()>;

    /// Queue an `error` record again as-is, clearing its failure state.
    async fn requeue(&self, id: &MutationId) -> Result<()>;

    /// Return records left `syncing` by an interrupted process to `pending`
    /// and delete any left `synced`. Returns the number of records touched.
    async fn recover_in_flight(&self) -> Result<usize>;

    /// Aggregate counts for status indicators.
    async fn log_counts(&self) -> Result<LogCounts>;

    // ─────────────────────────────────────────────────────────────────────────
    // Replica Store
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert the sale and decrement inventory for each item, atomically.
    ///
    /// Fails with `EntityNotFound` (and changes nothing) if any item's
    /// inventory line is missing.
    async fn create_sale_atomic(&self, sale: &Sale) -> Result<()>;

    /// Put returned items back into inventory, atomically.
    ///
    /// The original sale and every inventory line must exist.
    async fn apply_return_atomic(
        &self,
        sale_id: &EntityId,
        items: &[SaleItem],
        now: i64,
    ) -> Result<()>;

    /// Add `delta` to one inventory line. Returns the new quantity.
    async fn adjust_inventory_atomic(
        &self,
        product_id: &EntityId,
        delta: i64,
        now: i64,
    ) -> Result<i64>;

    /// Get one replica row.
    async fn get_entity(&self, target: &EntityRef) -> Result<Option<Entity>>;

    /// All replica rows of a kind, ordered by id.
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>>;

    /// Insert or replace a replica row as-is (seeding, fixtures).
    async fn upsert_entity(&self, entity: &Entity) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Pull / Cursor
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a pull batch by last-write-wins and advance the cursor.
    ///
    /// Changes and the cursor commit in one transaction. The cursor
    /// becomes `max(current, server_timestamp)`; it never moves back.
    async fn apply_pull(&self, changes: &[EntityChange], server_timestamp: i64)
        -> Result<ApplyReport>;

    /// The persisted `last_pulled_at` cursor, if any pull has completed.
    async fn last_pulled_at(&self) -> Result<Option<i64>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// The inventory line of one product.
    fn get_inventory(
        &self,
        product_id: &EntityId,
    ) -> impl std::future::Future<Output = Result<Option<InventoryLine>>> + Send;

    /// Current quantity of one inventory line.
    fn inventory_quantity(
        &self,
        product_id: &EntityId,
    ) -> impl std::future::Future<Output = Result<Option<i64>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn get_inventory(&self, product_id: &EntityId) -> Result<Option<InventoryLine>> {
        let target = EntityRef::inventory(product_id.clone());
        Ok(match self.get_entity(&target).await? {
            Some(Entity::Inventory(line)) => Some(line),
            _ => None,
        })
    }

    async fn inventory_quantity(&self, product_id: &EntityId) -> Result<Option<i64>> {
        Ok(self.get_inventory(product_id).await?.map(|line| line.quantity))
    }
}
