//! Proptest generators for property-based testing.

use proptest::prelude::*;

use till_core::{
    Entity, EntityChange, EntityId, InventoryLine, MutationId, MutationPayload, MutationStatus,
    SaleItem,
};

/// Generate a random MutationId.
pub fn mutation_id() -> impl Strategy<Value = MutationId> {
    any::<[u8; 16]>().prop_map(MutationId::from_bytes)
}

/// Generate a short entity id.
pub fn entity_id() -> impl Strategy<Value = EntityId> {
    "[a-z][a-z0-9]{0,7}".prop_map(EntityId::new)
}

/// Generate a product id from a small pool, so generated mutations collide.
pub fn product_id() -> impl Strategy<Value = EntityId> {
    (0u8..4).prop_map(|n| EntityId::new(format!("p{}", n)))
}

/// Generate a reasonable wall-clock timestamp (ms).
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_102_444_800_000
}

/// Generate a valid sale line.
pub fn sale_item() -> impl Strategy<Value = SaleItem> {
    (product_id(), 1i64..=20, 0i64..=10_000)
        .prop_map(|(id, quantity, price)| SaleItem::new(id, quantity, price))
}

/// Generate 1 to `max` valid sale lines.
pub fn sale_items(max: usize) -> impl Strategy<Value = Vec<SaleItem>> {
    prop::collection::vec(sale_item(), 1..=max.max(1))
}

/// Generate a sale payload whose total matches its items.
pub fn sale_payload() -> impl Strategy<Value = MutationPayload> {
    (entity_id(), prop::option::of(entity_id()), sale_items(5)).prop_map(
        |(sale_id, customer_id, items)| {
            let total_cents = items.iter().map(SaleItem::line_total_cents).sum();
            MutationPayload::Sale {
                sale_id,
                customer_id,
                items,
                total_cents,
            }
        },
    )
}

/// Generate a return payload.
pub fn return_payload() -> impl Strategy<Value = MutationPayload> {
    (
        entity_id(),
        entity_id(),
        sale_items(3),
        prop::option::of("[a-z ]{1,20}"),
    )
        .prop_map(|(return_id, sale_id, items, reason)| MutationPayload::Return {
            return_id,
            sale_id,
            items,
            reason,
        })
}

/// Generate an inventory adjustment with a non-zero delta.
pub fn adjustment_payload() -> impl Strategy<Value = MutationPayload> {
    (
        product_id(),
        prop_oneof![-50i64..=-1, 1i64..=50],
        prop::option::of("[a-z ]{1,20}"),
    )
        .prop_map(|(product_id, delta, reason)| MutationPayload::InventoryAdjustment {
            product_id,
            delta,
            reason,
        })
}

/// Generate any valid payload.
pub fn mutation_payload() -> impl Strategy<Value = MutationPayload> {
    prop_oneof![sale_payload(), return_payload(), adjustment_payload()]
}

/// Generate a MutationStatus.
pub fn mutation_status() -> impl Strategy<Value = MutationStatus> {
    prop_oneof![
        Just(MutationStatus::Pending),
        Just(MutationStatus::Syncing),
        Just(MutationStatus::Synced),
        Just(MutationStatus::Error),
    ]
}

/// Generate a stock-level change from the server.
pub fn inventory_change() -> impl Strategy<Value = EntityChange> {
    (product_id(), -100i64..=1_000, 1i64..=1_000_000).prop_map(|(product_id, quantity, version)| {
        EntityChange::upsert(
            Entity::Inventory(InventoryLine {
                product_id,
                quantity,
                updated_at: version,
                last_synced_at: None,
            }),
            version,
        )
    })
}

/// Generate a sequence of pull batches: changes plus the server timestamp.
pub fn pull_batches(max: usize) -> impl Strategy<Value = Vec<(Vec<EntityChange>, i64)>> {
    prop::collection::vec(
        (prop::collection::vec(inventory_change(), 0..4), 0i64..=1_000_000),
        1..=max.max(1),
    )
}
