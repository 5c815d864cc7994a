//! Golden wire vectors for the `/sync` endpoint.
//!
//! Each vector pairs a message with the exact JSON a server must accept
//! or produce. Server implementations can replay the JSON side; the Rust
//! side checks both directions with [`verify`].

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use till_core::{
    Entity, EntityChange, EntityId, EntityRef, InventoryLine, MutationId, MutationKind,
    MutationPayload, Sale, SaleItem,
};
use till_sync::{AckStatus, PullResponse, PushAck, PushRequest, PushResponse, WireMutation};

/// A golden wire vector.
#[derive(Debug, Clone)]
pub struct WireVector<T> {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// The message.
    pub value: T,
    /// Its JSON encoding (whitespace is not significant).
    pub json: &'static str,
}

fn id(byte: u8) -> MutationId {
    MutationId::from_bytes([byte; 16])
}

/// `POST /sync` bodies.
pub fn push_request_vectors() -> Vec<WireVector<PushRequest>> {
    vec![
        WireVector {
            name: "first push, sale with one line",
            value: PushRequest {
                changes: vec![WireMutation {
                    id: id(0x01),
                    kind: MutationKind::Sale,
                    payload: MutationPayload::Sale {
                        sale_id: EntityId::new("s1"),
                        customer_id: None,
                        items: vec![SaleItem::new("p1", 2, 450)],
                        total_cents: 900,
                    },
                    created_at: 1_700_000_000_000,
                }],
                last_pulled_at: None,
            },
            json: r#"{
                "changes": [{
                    "id": "01010101010101010101010101010101",
                    "kind": "sale",
                    "payload": {
                        "type": "sale",
                        "saleId": "s1",
                        "customerId": null,
                        "items": [{"productId": "p1", "quantity": 2, "unitPriceCents": 450}],
                        "totalCents": 900
                    },
                    "createdAt": 1700000000000
                }],
                "lastPulledAt": null
            }"#,
        },
        WireVector {
            name: "return and adjustment after a pull",
            value: PushRequest {
                changes: vec![
                    WireMutation {
                        id: id(0x02),
                        kind: MutationKind::Return,
                        payload: MutationPayload::Return {
                            return_id: EntityId::new("r1"),
                            sale_id: EntityId::new("s1"),
                            items: vec![SaleItem::new("p1", 1, 450)],
                            reason: Some("damaged".to_string()),
                        },
                        created_at: 1_700_000_060_000,
                    },
                    WireMutation {
                        id: id(0xab),
                        kind: MutationKind::InventoryAdjustment,
                        payload: MutationPayload::InventoryAdjustment {
                            product_id: EntityId::new("p2"),
                            delta: -3,
                            reason: None,
                        },
                        created_at: 1_700_000_060_001,
                    },
                ],
                last_pulled_at: Some(1_700_000_030_000),
            },
            json: r#"{
                "changes": [
                    {
                        "id": "02020202020202020202020202020202",
                        "kind": "return",
                        "payload": {
                            "type": "return",
                            "returnId": "r1",
                            "saleId": "s1",
                            "items": [{"productId": "p1", "quantity": 1, "unitPriceCents": 450}],
                            "reason": "damaged"
                        },
                        "createdAt": 1700000060000
                    },
                    {
                        "id": "abababababababababababababababab",
                        "kind": "inventoryAdjustment",
                        "payload": {
                            "type": "inventoryAdjustment",
                            "productId": "p2",
                            "delta": -3,
                            "reason": null
                        },
                        "createdAt": 1700000060001
                    }
                ],
                "lastPulledAt": 1700000030000
            }"#,
        },
    ]
}

/// `POST /sync` responses.
pub fn push_response_vectors() -> Vec<WireVector<PushResponse>> {
    vec![WireVector {
        name: "one of each ack status",
        value: PushResponse {
            acks: vec![
                PushAck::new(id(0x01), AckStatus::Accepted),
                PushAck::new(id(0x02), AckStatus::Duplicate),
                PushAck::new(id(0x03), AckStatus::Rejected).with_reason("unknown product p9"),
                PushAck::new(id(0x04), AckStatus::Failed).with_reason("lock timeout"),
            ],
        },
        json: r#"{
            "acks": [
                {"id": "01010101010101010101010101010101", "status": "accepted"},
                {"id": "02020202020202020202020202020202", "status": "duplicate"},
                {"id": "03030303030303030303030303030303", "status": "rejected", "reason": "unknown product p9"},
                {"id": "04040404040404040404040404040404", "status": "failed", "reason": "lock timeout"}
            ]
        }"#,
    }]
}

/// `GET /sync` responses.
pub fn pull_response_vectors() -> Vec<WireVector<PullResponse>> {
    vec![
        WireVector {
            name: "nothing new",
            value: PullResponse {
                changes: vec![],
                timestamp: 1_700_000_000_000,
            },
            json: r#"{"changes": [], "timestamp": 1700000000000}"#,
        },
        WireVector {
            name: "stock upsert, sale upsert and delete",
            value: PullResponse {
                changes: vec![
                    EntityChange::upsert(
                        Entity::Inventory(InventoryLine {
                            product_id: EntityId::new("p1"),
                            quantity: 8,
                            updated_at: 1_700_000_000_500,
                            last_synced_at: None,
                        }),
                        7,
                    ),
                    EntityChange::upsert(
                        Entity::Sale(Sale {
                            id: EntityId::new("s1"),
                            customer_id: Some(EntityId::new("c1")),
                            items: vec![SaleItem::new("p1", 2, 450)],
                            total_cents: 900,
                            created_at: 1_700_000_000_000,
                            updated_at: 1_700_000_000_000,
                            last_synced_at: None,
                        }),
                        8,
                    ),
                    EntityChange::delete(EntityRef::product("p9"), 9),
                ],
                timestamp: 9,
            },
            json: r#"{
                "changes": [
                    {
                        "version": 7,
                        "op": {"upsert": {
                            "kind": "inventory",
                            "productId": "p1",
                            "quantity": 8,
                            "updatedAt": 1700000000500,
                            "lastSyncedAt": null
                        }}
                    },
                    {
                        "version": 8,
                        "op": {"upsert": {
                            "kind": "sale",
                            "id": "s1",
                            "customerId": "c1",
                            "items": [{"productId": "p1", "quantity": 2, "unitPriceCents": 450}],
                            "totalCents": 900,
                            "createdAt": 1700000000000,
                            "updatedAt": 1700000000000,
                            "lastSyncedAt": null
                        }}
                    },
                    {
                        "version": 9,
                        "op": {"delete": {"kind": "product", "id": "p9"}}
                    }
                ],
                "timestamp": 9
            }"#,
        },
    ]
}

/// Check that `vector.value` encodes to `vector.json` and decodes back from it.
pub fn verify<T>(vector: &WireVector<T>) -> Result<(), String>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug,
{
    let expected: serde_json::Value = serde_json::from_str(vector.json)
        .map_err(|e| format!("{}: vector JSON does not parse: {}", vector.name, e))?;
    let encoded = serde_json::to_value(&vector.value)
        .map_err(|e| format!("{}: encode failed: {}", vector.name, e))?;
    if encoded != expected {
        return Err(format!(
            "{}: encoding mismatch\n  expected: {}\n  actual:   {}",
            vector.name, expected, encoded
        ));
    }

    let decoded: T = serde_json::from_str(vector.json)
        .map_err(|e| format!("{}: decode failed: {}", vector.name, e))?;
    if decoded != vector.value {
        return Err(format!("{}: decoding mismatch: {:?}", vector.name, decoded));
    }
    Ok(())
}
