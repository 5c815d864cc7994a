//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use till_core::{
    lww_should_apply, ChangeOp, Entity, EntityChange, EntityId, EntityKind, EntityRef,
    MutationFailure, MutationId, MutationPayload, MutationRecord, MutationStatus, Sale,
    SaleItem,
};

use crate::error::{Result, StoreError};
use crate::traits::{ApplyReport, LogCounts, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock;
/// every write holds the write lock for its whole duration.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Mutation log indexed by ID.
    mutations: BTreeMap<MutationId, MutationRecord>,

    /// Last assigned local sequence number.
    seq: u64,

    /// Replica rows keyed by `(kind, id)`.
    entities: BTreeMap<EntityRef, Entity>,

    /// Sync cursor.
    last_pulled_at: Option<i64>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn errored_mut(&mut self, id: &MutationId) -> Result<&mut MutationRecord> {
        let record = self
            .mutations
            .get_mut(id)
            .ok_or(StoreError::MutationNotFound(*id))?;
        if record.status != MutationStatus::Error {
            return Err(StoreError::WrongStatus {
                id: *id,
                expected: MutationStatus::Error,
                actual: record.status,
            });
        }
        Ok(record)
    }

    /// Fail unless every listed product has an inventory line.
    fn require_inventory(&self, items: &[SaleItem]) -> Result<()> {
        for item in items {
            let target = EntityRef::inventory(item.product_id.clone());
            if !self.entities.contains_key(&target) {
                return Err(StoreError::EntityNotFound {
                    kind: EntityKind::Inventory,
                    id: item.product_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn bump_inventory(&mut self, product_id: &EntityId, delta: i64, now: i64) -> Result<i64> {
        match self
            .entities
            .get_mut(&EntityRef::inventory(product_id.clone()))
        {
            Some(Entity::Inventory(line)) => {
                line.quantity += delta;
                line.updated_at = now;
                Ok(line.quantity)
            }
            _ => Err(StoreError::EntityNotFound {
                kind: EntityKind::Inventory,
                id: product_id.clone(),
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Mutation Log
    // ─────────────────────────────────────────────────────────────────────────

    async fn enqueue(&self, payload: &MutationPayload, now: i64) -> Result<MutationId> {
        let mut inner = self.write()?;
        let id = MutationId::generate();
        inner.seq += 1;
        let record = MutationRecord::new(id, inner.seq, payload.clone(), now);
        inner.mutations.insert(id, record);
        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<MutationRecord>> {
        let inner = self.read()?;
        let mut records: Vec<_> = inner
            .mutations
            .values()
            .filter(|r| r.status != MutationStatus::Synced)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.seq));
        Ok(records)
    }

    async fn get_mutation(&self, id: &MutationId) -> Result<Option<MutationRecord>> {
        Ok(self.read()?.mutations.get(id).cloned())
    }

    async fn mark_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let Some(record) = inner.mutations.get_mut(id) else {
            return Ok(());
        };
        if !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        if let Some(error) = error {
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn record_failure(&self, id: &MutationId, failure: &MutationFailure) -> Result<()> {
        if let Some(record) = self.write()?.mutations.get_mut(id) {
            record.apply_failure(failure);
        }
        Ok(())
    }

    async fn remove(&self, id: &MutationId) -> Result<bool> {
        let mut inner = self.write()?;
        let status = match inner.mutations.get(id) {
            None => return Ok(false),
            Some(record) => record.status,
        };
        if status != MutationStatus::Synced {
            return Err(StoreError::WrongStatus {
                id: *id,
                expected: MutationStatus::Synced,
                actual: status,
            });
        }
        Ok(inner.mutations.remove(id).is_some())
    }

    async fn acknowledge(&self, id: &MutationId) -> Result<bool> {
        let mut inner = self.write()?;
        let status = match inner.mutations.get(id) {
            None => return Ok(false),
            Some(record) => record.status,
        };
        if !status.can_transition_to(MutationStatus::Synced) {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from: status,
                to: MutationStatus::Synced,
            });
        }
        Ok(inner.mutations.remove(id).is_some())
    }

    async fn discard(&self, id: &MutationId) -> Result<MutationRecord> {
        let mut inner = self.write()?;
        inner.errored_mut(id)?;
        inner
            .mutations
            .remove(id)
            .ok_or(StoreError::MutationNotFound(*id))
    }

    async fn amend(&self, id: &MutationId, payload: &MutationPayload) -> Result<()> {
        let mut inner = self.write()?;
        let record = inner.errored_mut(id)?;
        let fresh = MutationRecord::new(record.id, record.seq, payload.clone(), record.created_at);
        *record = fresh;
        Ok(())
    }

    async fn requeue(&self, id: &MutationId) -> Result<()> {
        let mut inner = self.write()?;
        let record = inner.errored_mut(id)?;
        let fresh = MutationRecord::new(
            record.id,
            record.seq,
            record.payload.clone(),
            record.created_at,
        );
        *record = fresh;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.mutations.len();
        inner
            .mutations
            .retain(|_, record| record.status != MutationStatus::Synced);
        let mut n = before - inner.mutations.len();
        for record in inner.mutations.values_mut() {
            if record.status == MutationStatus::Syncing {
                record.status = MutationStatus::Pending;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn log_counts(&self) -> Result<LogCounts> {
        let inner = self.read()?;
        let mut counts = LogCounts::default();
        for record in inner.mutations.values() {
            match record.status {
                MutationStatus::Pending | MutationStatus::Syncing => counts.pending += 1,
                MutationStatus::Error => {
                    counts.errors += 1;
                    if record.is_rejected() {
                        counts.rejected += 1;
                    }
                }
                MutationStatus::Synced => {}
            }
        }
        Ok(counts)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replica Store
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_sale_atomic(&self, sale: &Sale) -> Result<()> {
        let mut inner = self.write()?;
        inner.require_inventory(&sale.items)?;
        for item in &sale.items {
            inner.bump_inventory(&item.product_id, -item.quantity, sale.updated_at)?;
        }
        inner
            .entities
            .insert(EntityRef::sale(sale.id.clone()), Entity::Sale(sale.clone()));
        Ok(())
    }

    async fn apply_return_atomic(
        &self,
        sale_id: &EntityId,
        items: &[SaleItem],
        now: i64,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.entities.contains_key(&EntityRef::sale(sale_id.clone())) {
            return Err(StoreError::EntityNotFound {
                kind: EntityKind::Sale,
                id: sale_id.clone(),
            });
        }
        inner.require_inventory(items)?;
        for item in items {
            inner.bump_inventory(&item.product_id, item.quantity, now)?;
        }
        Ok(())
    }

    async fn adjust_inventory_atomic(
        &self,
        product_id: &EntityId,
        delta: i64,
        now: i64,
    ) -> Result<i64> {
        self.write()?.bump_inventory(product_id, delta, now)
    }

    async fn get_entity(&self, target: &EntityRef) -> Result<Option<Entity>> {
        Ok(self.read()?.entities.get(target).cloned())
    }

    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        Ok(self
            .read()?
            .entities
            .iter()
            .filter(|(target, _)| target.kind == kind)
            .map(|(_, entity)| entity.clone())
            .collect())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.write()?
            .entities
            .insert(entity.entity_ref(), entity.clone());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull / Cursor
    // ─────────────────────────────────────────────────────────────────────────

    async fn apply_pull(
        &self,
        changes: &[EntityChange],
        server_timestamp: i64,
    ) -> Result<ApplyReport> {
        let mut inner = self.write()?;
        let mut report = ApplyReport::default();

        for change in changes {
            let target = change.target();
            let local = inner.entities.get(&target).map(Entity::last_synced_at);
            if !lww_should_apply(local, change.version) {
                report.skipped += 1;
                continue;
            }
            match &change.op {
                ChangeOp::Upsert(entity) => {
                    let mut entity = entity.clone();
                    entity.mark_synced(change.version);
                    inner.entities.insert(target, entity);
                }
                ChangeOp::Delete(_) => {
                    inner.entities.remove(&target);
                }
            }
            report.applied += 1;
        }

        let cursor = inner
            .last_pulled_at
            .map_or(server_timestamp, |c| c.max(server_timestamp));
        inner.last_pulled_at = Some(cursor);
        report.cursor = cursor;
        Ok(report)
    }

    async fn last_pulled_at(&self) -> Result<Option<i64>> {
        Ok(self.read()?.last_pulled_at)
    }
}
