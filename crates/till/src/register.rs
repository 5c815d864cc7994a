//! The register: unified API for recording sales and keeping them in sync.
//!
//! Every local write follows the same order: validate, commit the replica
//! change, enqueue the mutation, nudge the worker. A write that fails
//! leaves neither a replica change nor a mutation behind.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use till_core::{
    validate_payload, Clock, Entity, EntityId, EntityKind, EntityRef, MutationId,
    MutationPayload, MutationRecord, Sale, SaleItem,
};
use till_store::{SqliteStore, Store, StoreError, StoreExt};
use till_sync::{
    spawn_worker, AuthProvider, ConnectivityMonitor, SyncEngine, SyncOutcome, SyncStatus,
    SyncTrigger, Transport, WorkerHandle,
};

use crate::config::TillConfig;
use crate::error::{Result, TillError};

/// One point-of-sale register: local store, write path and sync worker.
pub struct Till<S: Store + ?Sized, T: Transport> {
    engine: Arc<SyncEngine<S, T>>,
    worker: Option<WorkerHandle>,
    config: TillConfig,
}

impl<T: Transport + 'static> Till<SqliteStore, T> {
    /// Open (and migrate) the SQLite database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        transport: T,
        connectivity: Arc<dyn ConnectivityMonitor>,
        auth: Arc<dyn AuthProvider>,
        config: TillConfig,
    ) -> Result<Self> {
        let store = SqliteStore::open(path)?;
        Ok(Self::new(
            Arc::new(store),
            transport,
            connectivity,
            auth,
            config,
        ))
    }
}

impl<S: Store + ?Sized + 'static, T: Transport + 'static> Till<S, T> {
    /// Create a register over an opened store. Nothing runs until [`start`](Self::start).
    pub fn new(
        store: Arc<S>,
        transport: T,
        connectivity: Arc<dyn ConnectivityMonitor>,
        auth: Arc<dyn AuthProvider>,
        config: TillConfig,
    ) -> Self {
        let engine = SyncEngine::new(store, transport, connectivity, auth, config.sync.clone());
        Self {
            engine: Arc::new(engine),
            worker: None,
            config,
        }
    }

    /// Replace the wall clock. Has no effect once the worker holds the engine.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        match Arc::get_mut(&mut self.engine) {
            Some(engine) => engine.set_clock(clock),
            None => warn!("clock not replaced: engine already shared"),
        }
        self
    }

    pub fn store(&self) -> &Arc<S> {
        self.engine.store()
    }

    pub fn engine(&self) -> &Arc<SyncEngine<S, T>> {
        &self.engine
    }

    pub fn config(&self) -> &TillConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.engine.clock().now_millis()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Recover records a crash left in flight, spawn the sync worker and
    /// request the start-up cycle.
    pub async fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(TillError::AlreadyStarted);
        }
        let recovered = self.store().recover_in_flight().await?;
        if recovered > 0 {
            info!(recovered, "returned interrupted mutations to pending");
        }
        self.engine.refresh_status().await?;

        let worker = spawn_worker(self.engine.clone(), self.config.trigger_capacity);
        worker.app_start();
        self.worker = Some(worker);
        Ok(())
    }

    /// Abort any running cycle and stop the worker.
    pub async fn shutdown(mut self) {
        self.engine.cancel();
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
    }

    /// Stop syncing until [`login`](Self::login). Local writes keep working.
    pub fn logout(&self) {
        self.engine.cancel();
    }

    /// Allow syncing again and request a cycle.
    pub fn login(&self) {
        self.engine.resume();
        if let Some(worker) = &self.worker {
            worker.app_start();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write path
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a sale: insert it and decrement inventory in one transaction,
    /// then enqueue the mutation.
    pub async fn record_sale(
        &self,
        customer_id: Option<EntityId>,
        items: Vec<SaleItem>,
    ) -> Result<(Sale, MutationId)> {
        let now = self.now();
        let sale = Sale::new(EntityId::generate(), customer_id, items, now);
        let payload = MutationPayload::Sale {
            sale_id: sale.id.clone(),
            customer_id: sale.customer_id.clone(),
            items: sale.items.clone(),
            total_cents: sale.total_cents,
        };
        validate_payload(&payload)?;

        self.store().create_sale_atomic(&sale).await?;
        let id = self.enqueue_committed(&payload, now).await?;
        Ok((sale, id))
    }

    /// Record a return against an existing sale.
    pub async fn record_return(
        &self,
        sale_id: EntityId,
        items: Vec<SaleItem>,
        reason: Option<String>,
    ) -> Result<MutationId> {
        let now = self.now();
        let payload = MutationPayload::Return {
            return_id: EntityId::generate(),
            sale_id: sale_id.clone(),
            items: items.clone(),
            reason,
        };
        validate_payload(&payload)?;

        self.store().apply_return_atomic(&sale_id, &items, now).await?;
        self.enqueue_committed(&payload, now).await
    }

    /// Add `delta` to a product's stock. Returns the mutation id and the
    /// new local quantity.
    pub async fn adjust_inventory(
        &self,
        product_id: EntityId,
        delta: i64,
        reason: Option<String>,
    ) -> Result<(MutationId, i64)> {
        let now = self.now();
        let payload = MutationPayload::InventoryAdjustment {
            product_id: product_id.clone(),
            delta,
            reason,
        };
        validate_payload(&payload)?;

        let quantity = self
            .store()
            .adjust_inventory_atomic(&product_id, delta, now)
            .await?;
        let id = self.enqueue_committed(&payload, now).await?;
        Ok((id, quantity))
    }

    /// Seed or replace a catalog row (products, customers, stock levels).
    pub async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.store().upsert_entity(entity).await?;
        Ok(())
    }

    async fn enqueue_committed(&self, payload: &MutationPayload, now: i64) -> Result<MutationId> {
        let id = match self.store().enqueue(payload, now).await {
            Ok(id) => id,
            Err(e) => {
                error!(kind = %payload.kind(), error = %e, "write committed but not enqueued");
                return Err(e.into());
            }
        };
        debug!(mutation_id = %id, kind = %payload.kind(), "mutation enqueued");
        self.after_write().await;
        Ok(id)
    }

    /// Publish the new counts and wake the worker. The write has already
    /// committed, so a failed status read is only logged.
    async fn after_write(&self) {
        if let Err(e) = self.engine.refresh_status().await {
            warn!(error = %e, "status refresh after write failed");
        }
        if let Some(worker) = &self.worker {
            worker.notify_write();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn entity(&self, target: &EntityRef) -> Result<Option<Entity>> {
        Ok(self.store().get_entity(target).await?)
    }

    pub async fn entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        Ok(self.store().list_entities(kind).await?)
    }

    pub async fn inventory_quantity(&self, product_id: &EntityId) -> Result<Option<i64>> {
        Ok(self.store().inventory_quantity(product_id).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation log
    // ─────────────────────────────────────────────────────────────────────────

    /// Every mutation not yet acknowledged, oldest first.
    pub async fn pending_mutations(&self) -> Result<Vec<MutationRecord>> {
        Ok(self.store().list_pending().await?)
    }

    /// Drop a failed mutation. The local replica keeps its effect until the
    /// next pull overwrites it.
    pub async fn discard(&self, id: &MutationId) -> Result<MutationRecord> {
        let record = self.store().discard(id).await?;
        info!(mutation_id = %id, "failed mutation discarded");
        if let Err(e) = self.engine.refresh_status().await {
            warn!(error = %e, "status refresh after discard failed");
        }
        Ok(record)
    }

    /// Replace the payload of a failed mutation and queue it again.
    pub async fn amend(&self, id: &MutationId, payload: MutationPayload) -> Result<()> {
        validate_payload(&payload)?;
        let record = self
            .store()
            .get_mutation(id)
            .await?
            .ok_or(StoreError::MutationNotFound(*id))?;
        if record.kind != payload.kind() {
            return Err(TillError::KindMismatch {
                id: *id,
                expected: record.kind,
                actual: payload.kind(),
            });
        }
        self.store().amend(id, &payload).await?;
        info!(mutation_id = %id, "failed mutation amended");
        self.after_write().await;
        Ok(())
    }

    /// Queue a failed mutation again without changes.
    pub async fn resubmit(&self, id: &MutationId) -> Result<()> {
        self.store().requeue(id).await?;
        info!(mutation_id = %id, "failed mutation resubmitted");
        self.after_write().await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Manual refresh: run a cycle now, bypassing the cycle backoff.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        let outcome = match &self.worker {
            Some(worker) => worker.sync_now().await?,
            None => self.engine.run_cycle(SyncTrigger::Manual).await?,
        };
        Ok(outcome)
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Status updates; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.engine.subscribe()
    }
}
