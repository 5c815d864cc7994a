//! Store wrapper that fails chosen operations on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use till_core::{
    Entity, EntityChange, EntityId, EntityKind, EntityRef, MutationFailure, MutationId,
    MutationPayload, MutationRecord, MutationStatus, Sale, SaleItem,
};
use till_store::{ApplyReport, LogCounts, MemoryStore, Result, Store, StoreError};

/// A [`Store`] that delegates to an inner store unless a fault is armed.
pub struct FaultyStore<S: Store + ?Sized = MemoryStore> {
    inner: Arc<S>,
    fail_log_counts: AtomicBool,
    fail_acknowledge: AtomicBool,
}

impl<S: Store + ?Sized> FaultyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_log_counts: AtomicBool::new(false),
            fail_acknowledge: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Make status reads (`log_counts`) fail.
    pub fn set_fail_log_counts(&self, fail: bool) {
        self.fail_log_counts.store(fail, Ordering::SeqCst);
    }

    /// Make recording a server acknowledgment fail.
    pub fn set_fail_acknowledge(&self, fail: bool) {
        self.fail_acknowledge.store(fail, Ordering::SeqCst);
    }

    /// Disarm every fault.
    pub fn reset(&self) {
        self.set_fail_log_counts(false);
        self.set_fail_acknowledge(false);
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("simulated failure in {op}"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for FaultyStore<S> {
    async fn enqueue(&self, payload: &MutationPayload, now: i64) -> Result<MutationId> {
        self.inner.enqueue(payload, now).await
    }

    async fn list_pending(&self) -> Result<Vec<MutationRecord>> {
        self.inner.list_pending().await
    }

    async fn get_mutation(&self, id: &MutationId) -> Result<Option<MutationRecord>> {
        self.inner.get_mutation(id).await
    }

    async fn mark_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.inner.mark_status(id, status, error).await
    }

    async fn record_failure(&self, id: &MutationId, failure: &MutationFailure) -> Result<()> {
        self.inner.record_failure(id, failure).await
    }

    async fn remove(&self, id: &MutationId) -> Result<bool> {
        self.inner.remove(id).await
    }

    async fn acknowledge(&self, id: &MutationId) -> Result<bool> {
        Self::check(&self.fail_acknowledge, "acknowledge")?;
        self.inner.acknowledge(id).await
    }

    async fn discard(&self, id: &MutationId) -> Result<MutationRecord> {
        self.inner.discard(id).await
    }

    async fn amend(&self, id: &MutationId, payload: &MutationPayload) -> Result<()> {
        self.inner.amend(id, payload).await
    }

    async fn requeue(&self, id: &MutationId) -> Result<()> {
        self.inner.requeue(id).await
    }

    async fn recover_in_flight(&self) -> Result<usize> {
        self.inner.recover_in_flight().await
    }

    async fn log_counts(&self) -> Result<LogCounts> {
        Self::check(&self.fail_log_counts, "log_counts")?;
        self.inner.log_counts().await
    }

    async fn create_sale_atomic(&self, sale: &Sale) -> Result<()> {
        self.inner.create_sale_atomic(sale).await
    }

    async fn apply_return_atomic(
        &self,
        sale_id: &EntityId,
        items: &[SaleItem],
        now: i64,
    ) -> Result<()> {
        self.inner.apply_return_atomic(sale_id, items, now).await
    }

    async fn adjust_inventory_atomic(
        &self,
        product_id: &EntityId,
        delta: i64,
        now: i64,
    ) -> Result<i64> {
        self.inner.adjust_inventory_atomic(product_id, delta, now).await
    }

    async fn get_entity(&self, target: &EntityRef) -> Result<Option<Entity>> {
        self.inner.get_entity(target).await
    }

    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.inner.list_entities(kind).await
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.inner.upsert_entity(entity).await
    }

    async fn apply_pull(
        &self,
        changes: &[EntityChange],
        server_timestamp: i64,
    ) -> Result<ApplyReport> {
        self.inner.apply_pull(changes, server_timestamp).await
    }

    async fn last_pulled_at(&self) -> Result<Option<i64>> {
        self.inner.last_pulled_at().await
    }
}
