//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use till_core::{Entity, EntityId, InventoryLine, ManualClock, Product, SaleItem};
use till_store::{MemoryStore, Store};
use till_sync::{
    MemoryServer, MemoryTransport, StaticAuth, StaticConnectivity, SyncConfig, SyncEngine,
};

/// Wall clock the fixture starts at (2023-11-14T22:13:20Z).
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Token the fixture's auth provider hands out.
pub const TOKEN: &str = "test-token";

/// A local store, a server, and the collaborators connecting them.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub server: Arc<MemoryServer>,
    pub connectivity: Arc<StaticConnectivity>,
    pub auth: Arc<StaticAuth>,
    pub clock: ManualClock,
}

impl TestFixture {
    /// Online, logged in, clock at [`START_MILLIS`], empty catalog.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            server: MemoryServer::new(),
            connectivity: Arc::new(StaticConnectivity::online()),
            auth: Arc::new(StaticAuth::with_token(TOKEN)),
            clock: ManualClock::new(START_MILLIS),
        }
    }

    /// Seed a product and its stock level on both sides.
    pub async fn stock(&self, product_id: &str, quantity: i64) -> till_store::Result<()> {
        self.stock_in(self.store.as_ref(), product_id, quantity).await
    }

    /// Like [`stock`](Self::stock), for another local store.
    pub async fn stock_in<S: Store + ?Sized>(
        &self,
        store: &S,
        product_id: &str,
        quantity: i64,
    ) -> till_store::Result<()> {
        for entity in [product(product_id, 100), inventory(product_id, quantity)] {
            self.server.put_entity(entity.clone());
            store.upsert_entity(&entity).await?;
        }
        Ok(())
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.server.clone())
    }

    /// An engine over the fixture's memory store, on the fixture clock.
    pub fn engine(&self, config: SyncConfig) -> SyncEngine<MemoryStore, MemoryTransport> {
        self.engine_over(self.store.clone(), config)
    }

    /// An engine over any store, wired to the fixture's server.
    pub fn engine_over<S: Store + ?Sized>(
        &self,
        store: Arc<S>,
        config: SyncConfig,
    ) -> SyncEngine<S, MemoryTransport> {
        SyncEngine::new(
            store,
            self.transport(),
            self.connectivity.clone(),
            self.auth.clone(),
            config,
        )
        .with_clock(Arc::new(self.clock.clone()))
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn product(id: &str, price_cents: i64) -> Entity {
    Entity::Product(Product {
        id: EntityId::new(id),
        name: format!("Product {}", id),
        sku: id.to_uppercase(),
        price_cents,
        updated_at: START_MILLIS,
        last_synced_at: None,
    })
}

pub fn inventory(product_id: &str, quantity: i64) -> Entity {
    Entity::Inventory(InventoryLine {
        product_id: EntityId::new(product_id),
        quantity,
        updated_at: START_MILLIS,
        last_synced_at: None,
    })
}

pub fn item(product_id: &str, quantity: i64, unit_price_cents: i64) -> SaleItem {
    SaleItem::new(product_id, quantity, unit_price_cents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_core::EntityRef;
    use till_store::StoreExt;

    #[tokio::test]
    async fn test_stock_seeds_both_sides() {
        let fixture = TestFixture::new();
        fixture.stock("p1", 10).await.unwrap();

        assert_eq!(
            fixture.store.inventory_quantity(&"p1".into()).await.unwrap(),
            Some(10)
        );
        assert_eq!(fixture.server.inventory_quantity("p1"), Some(10));
        assert!(fixture
            .server
            .entity(&EntityRef::product("p1"))
            .is_some());
    }

    #[tokio::test]
    async fn test_engine_uses_fixture_clock() {
        let fixture = TestFixture::new();
        let engine = fixture.engine(SyncConfig::default());
        fixture.clock.advance(5);
        assert_eq!(engine.clock().now_millis(), START_MILLIS + 5);
    }
}
