//! Mutation records: locally originated changes awaiting server acknowledgment.
//!
//! A record lives in the mutation log from the moment it is enqueued until
//! the server acknowledges it. Its status moves forward only:
//!
//! ```text
//! pending ──> syncing ──> synced (then removed)
//!    ^           │
//!    │           └──> error ──> pending (next retry)
//!    └───────────────┘ (aborted cycle restores the prior status)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::entity::SaleItem;
use crate::error::CoreError;
use crate::types::{EntityId, EntityRef, MutationId};

/// Discriminator for the mutation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Sale,
    Return,
    InventoryAdjustment,
}

impl MutationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Sale => "sale",
            MutationKind::Return => "return",
            MutationKind::InventoryAdjustment => "inventoryAdjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sale" => Some(MutationKind::Sale),
            "return" => Some(MutationKind::Return),
            "inventoryAdjustment" => Some(MutationKind::InventoryAdjustment),
            _ => None,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed-schema body of a mutation, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MutationPayload {
    #[serde(rename_all = "camelCase")]
    Sale {
        sale_id: EntityId,
        customer_id: Option<EntityId>,
        items: Vec<SaleItem>,
        total_cents: i64,
    },
    #[serde(rename_all = "camelCase")]
    Return {
        return_id: EntityId,
        sale_id: EntityId,
        items: Vec<SaleItem>,
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    InventoryAdjustment {
        product_id: EntityId,
        delta: i64,
        reason: Option<String>,
    },
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::Sale { .. } => MutationKind::Sale,
            MutationPayload::Return { .. } => MutationKind::Return,
            MutationPayload::InventoryAdjustment { .. } => MutationKind::InventoryAdjustment,
        }
    }

    /// Every replica row this mutation writes on the server.
    ///
    /// Two mutations sharing a target must reach the server in creation
    /// order; the push phase uses this set to hold back later ones.
    pub fn targets(&self) -> BTreeSet<EntityRef> {
        let mut targets = BTreeSet::new();
        match self {
            MutationPayload::Sale { sale_id, items, .. } => {
                targets.insert(EntityRef::sale(sale_id.clone()));
                for item in items {
                    targets.insert(EntityRef::inventory(item.product_id.clone()));
                }
            }
            MutationPayload::Return { sale_id, items, .. } => {
                targets.insert(EntityRef::sale(sale_id.clone()));
                for item in items {
                    targets.insert(EntityRef::inventory(item.product_id.clone()));
                }
            }
            MutationPayload::InventoryAdjustment { product_id, .. } => {
                targets.insert(EntityRef::inventory(product_id.clone()));
            }
        }
        targets
    }
}

/// Lifecycle state of a mutation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Syncing,
    Synced,
    Error,
}

impl MutationStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Syncing => "syncing",
            MutationStatus::Synced => "synced",
            MutationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MutationStatus::Pending),
            "syncing" => Some(MutationStatus::Syncing),
            "synced" => Some(MutationStatus::Synced),
            "error" => Some(MutationStatus::Error),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Re-asserting the current status is always allowed (idempotent).
    pub fn can_transition_to(self, next: MutationStatus) -> bool {
        use MutationStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Syncing, Synced)
                | (Syncing, Error)
                | (Syncing, Pending)
                | (Error, Pending)
        )
    }

    /// Check a transition, returning the error the store surfaces.
    pub fn transition_to(self, next: MutationStatus) -> Result<MutationStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an `error` record failed, which decides whether it is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeout, I/O or server hiccup. Retried with backoff.
    Transient,
    /// The server refused the payload. Needs discard or amend.
    Rejected,
}

impl FailureClass {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(FailureClass::Transient),
            "rejected" => Some(FailureClass::Rejected),
            _ => None,
        }
    }
}

/// A failed push attempt, as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub class: FailureClass,
    pub message: String,
    /// Earliest time the record may be pushed again. `None` for rejections.
    pub next_retry_at: Option<i64>,
}

/// A single entry of the local mutation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub id: MutationId,
    /// Local insertion counter; breaks ties between equal `created_at`.
    pub seq: u64,
    pub kind: MutationKind,
    pub payload: MutationPayload,
    pub created_at: i64,
    pub status: MutationStatus,
    pub last_error: Option<String>,
    pub failure: Option<FailureClass>,
    /// Consecutive failed attempts.
    pub attempt: u32,
    pub next_retry_at: Option<i64>,
}

impl MutationRecord {
    /// A fresh `pending` record.
    pub fn new(id: MutationId, seq: u64, payload: MutationPayload, created_at: i64) -> Self {
        Self {
            id,
            seq,
            kind: payload.kind(),
            payload,
            created_at,
            status: MutationStatus::Pending,
            last_error: None,
            failure: None,
            attempt: 0,
            next_retry_at: None,
        }
    }

    pub fn targets(&self) -> BTreeSet<EntityRef> {
        self.payload.targets()
    }

    /// Rejected records wait for the caller; they are never pushed again as-is.
    pub fn is_rejected(&self) -> bool {
        self.status == MutationStatus::Error && self.failure == Some(FailureClass::Rejected)
    }

    /// Whether the push phase may send this record at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        match self.status {
            MutationStatus::Pending | MutationStatus::Syncing => true,
            MutationStatus::Synced => false,
            MutationStatus::Error => {
                !self.is_rejected() && self.next_retry_at.map_or(true, |at| at <= now)
            }
        }
    }

    /// Apply a failure to this record (the in-memory twin of `record_failure`).
    pub fn apply_failure(&mut self, failure: &MutationFailure) {
        self.status = MutationStatus::Error;
        self.last_error = Some(failure.message.clone());
        self.failure = Some(failure.class);
        self.attempt = self.attempt.saturating_add(1);
        self.next_retry_at = failure.next_retry_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sale_payload() -> MutationPayload {
        MutationPayload::Sale {
            sale_id: "s1".into(),
            customer_id: None,
            items: vec![SaleItem::new("p1", 2, 100), SaleItem::new("p2", 1, 50)],
            total_cents: 250,
        }
    }

    #[test]
    fn test_kind_follows_payload() {
        assert_eq!(sale_payload().kind(), MutationKind::Sale);
        let adj = MutationPayload::InventoryAdjustment {
            product_id: "p1".into(),
            delta: -1,
            reason: None,
        };
        assert_eq!(adj.kind(), MutationKind::InventoryAdjustment);
    }

    #[test]
    fn test_sale_targets_sale_and_inventory_lines() {
        let targets = sale_payload().targets();
        assert!(targets.contains(&EntityRef::sale("s1")));
        assert!(targets.contains(&EntityRef::inventory("p1")));
        assert!(targets.contains(&EntityRef::inventory("p2")));
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_allowed_transitions() {
        use MutationStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Error));
        assert!(Error.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Pending));

        assert!(!Synced.can_transition_to(Pending));
        assert!(!Synced.can_transition_to(Error));
        assert!(!Error.can_transition_to(Syncing));
        assert!(!Pending.can_transition_to(Synced));
    }

    #[test]
    fn test_rejected_record_is_never_due() {
        let mut record = MutationRecord::new(MutationId::generate(), 1, sale_payload(), 0);
        record.apply_failure(&MutationFailure {
            class: FailureClass::Rejected,
            message: "bad sku".into(),
            next_retry_at: None,
        });
        assert!(record.is_rejected());
        assert!(!record.is_due(i64::MAX));
    }

    #[test]
    fn test_transient_record_due_after_window() {
        let mut record = MutationRecord::new(MutationId::generate(), 1, sale_payload(), 0);
        record.apply_failure(&MutationFailure {
            class: FailureClass::Transient,
            message: "timeout".into(),
            next_retry_at: Some(2_000),
        });
        assert_eq!(record.attempt, 1);
        assert!(!record.is_due(1_999));
        assert!(record.is_due(2_000));
    }

    #[test]
    fn test_payload_json_is_tagged() {
        let json = serde_json::to_value(sale_payload()).unwrap();
        assert_eq!(json["type"], "sale");
        assert_eq!(json["saleId"], "s1");
        assert_eq!(json["totalCents"], 250);
    }

    fn status() -> impl Strategy<Value = MutationStatus> {
        prop_oneof![
            Just(MutationStatus::Pending),
            Just(MutationStatus::Syncing),
            Just(MutationStatus::Synced),
            Just(MutationStatus::Error),
        ]
    }

    proptest! {
        #[test]
        fn test_nothing_leaves_synced(next in status()) {
            prop_assert_eq!(
                MutationStatus::Synced.can_transition_to(next),
                next == MutationStatus::Synced
            );
        }

        #[test]
        fn test_any_walk_never_returns_from_synced(steps in prop::collection::vec(status(), 0..20)) {
            let mut current = MutationStatus::Pending;
            let mut reached_synced = false;
            for next in steps {
                if let Ok(s) = current.transition_to(next) {
                    current = s;
                }
                if current == MutationStatus::Synced {
                    reached_synced = true;
                }
                if reached_synced {
                    prop_assert_eq!(current, MutationStatus::Synced);
                }
            }
        }
    }
}
