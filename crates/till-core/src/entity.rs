//! Replica entities: the local copies of server-owned records.
//!
//! Every entity carries `last_synced_at`, the server version it was last
//! merged at. Pull-phase merges are last-write-wins against that marker.

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityKind, EntityRef};

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: EntityId,
    pub name: String,
    pub sku: String,
    pub price_cents: i64,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
}

/// A customer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: EntityId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
}

/// Stock on hand for one product. Keyed by the product id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLine {
    pub product_id: EntityId,
    /// May go negative while offline; the server reconciles.
    pub quantity: i64,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
}

/// One line of a sale or return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub product_id: EntityId,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl SaleItem {
    pub fn new(product_id: impl Into<EntityId>, quantity: i64, unit_price_cents: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
        }
    }

    /// Line total in cents.
    pub fn line_total_cents(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price_cents)
    }
}

/// A completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: EntityId,
    pub customer_id: Option<EntityId>,
    pub items: Vec<SaleItem>,
    pub total_cents: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
}

impl Sale {
    /// Build a new, never-synced sale. The total is the sum of line totals.
    pub fn new(
        id: EntityId,
        customer_id: Option<EntityId>,
        items: Vec<SaleItem>,
        now: i64,
    ) -> Self {
        let total_cents = items.iter().map(SaleItem::line_total_cents).sum();
        Self {
            id,
            customer_id,
            items,
            total_cents,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
        }
    }
}

/// A replica row of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Product(Product),
    Customer(Customer),
    Inventory(InventoryLine),
    Sale(Sale),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Product(_) => EntityKind::Product,
            Entity::Customer(_) => EntityKind::Customer,
            Entity::Inventory(_) => EntityKind::Inventory,
            Entity::Sale(_) => EntityKind::Sale,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Product(p) => &p.id,
            Entity::Customer(c) => &c.id,
            Entity::Inventory(i) => &i.product_id,
            Entity::Sale(s) => &s.id,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id().clone())
    }

    pub fn last_synced_at(&self) -> Option<i64> {
        match self {
            Entity::Product(p) => p.last_synced_at,
            Entity::Customer(c) => c.last_synced_at,
            Entity::Inventory(i) => i.last_synced_at,
            Entity::Sale(s) => s.last_synced_at,
        }
    }

    /// Stamp the entity as merged at server version `version`.
    pub fn mark_synced(&mut self, version: i64) {
        let slot = match self {
            Entity::Product(p) => &mut p.last_synced_at,
            Entity::Customer(c) => &mut c.last_synced_at,
            Entity::Inventory(i) => &mut i.last_synced_at,
            Entity::Sale(s) => &mut s.last_synced_at,
        };
        *slot = Some(version);
    }
}

/// What a server change does to one replica row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// Insert or replace the row.
    Upsert(Entity),
    /// Remove the row.
    Delete(EntityRef),
}

/// A single server-side change returned by the pull phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    /// Server timestamp of the change; compared against `last_synced_at`.
    pub version: i64,
    pub op: ChangeOp,
}

impl EntityChange {
    pub fn upsert(entity: Entity, version: i64) -> Self {
        Self {
            version,
            op: ChangeOp::Upsert(entity),
        }
    }

    pub fn delete(target: EntityRef, version: i64) -> Self {
        Self {
            version,
            op: ChangeOp::Delete(target),
        }
    }

    /// The row this change touches.
    pub fn target(&self) -> EntityRef {
        match &self.op {
            ChangeOp::Upsert(entity) => entity.entity_ref(),
            ChangeOp::Delete(target) => target.clone(),
        }
    }
}

/// Last-write-wins decision for an incoming change.
///
/// A change is applied when there is no local row, the local row was
/// never synced, or the change is strictly newer than the local marker.
/// Equal versions are skipped so re-pulling the same page is a no-op.
pub fn lww_should_apply(local_last_synced_at: Option<Option<i64>>, incoming_version: i64) -> bool {
    match local_last_synced_at {
        None | Some(None) => true,
        Some(Some(local)) => incoming_version > local,
    }
}
