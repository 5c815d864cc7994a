//! Local write path and mutation-log maintenance through the `Till` API.

use std::sync::Arc;

use proptest::prelude::*;

use till::core::ValidationError;
use till::store::{MemoryStore, SqliteStore, Store, StoreError};
use till::sync::{MemoryTransport, ScriptedFailure, SyncError};
use till::{EntityRef, MutationPayload, MutationStatus, Till, TillConfig, TillError};
use till_testkit::generators::pull_batches;
use till_testkit::{item, FaultyStore, TestFixture};

fn memory_till(fixture: &TestFixture) -> Till<MemoryStore, MemoryTransport> {
    Till::new(
        fixture.store.clone(),
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        TillConfig::default(),
    )
    .with_clock(Arc::new(fixture.clock.clone()))
}

#[tokio::test]
async fn test_sale_with_unknown_product_changes_nothing() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    let err = till
        .record_sale(None, vec![item("p1", 2, 450), item("ghost", 1, 100)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TillError::Store(StoreError::EntityNotFound { .. })
    ));

    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(10));
    assert!(till.pending_mutations().await.unwrap().is_empty());
    assert!(till
        .entities(till::EntityKind::Sale)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sale_is_atomic_on_sqlite() {
    let fixture = TestFixture::new();
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    fixture.stock_in(store.as_ref(), "p1", 10).await.unwrap();
    fixture.stock_in(store.as_ref(), "p2", 3).await.unwrap();
    let till = Till::new(
        store.clone(),
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        TillConfig::default(),
    );

    let (sale, _) = till
        .record_sale(None, vec![item("p1", 2, 450), item("p2", 5, 100)])
        .await
        .unwrap();
    assert_eq!(sale.total_cents, 1_400);
    // Quantities may go negative while offline.
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));
    assert_eq!(till.inventory_quantity(&"p2".into()).await.unwrap(), Some(-2));
    assert!(till
        .entity(&EntityRef::sale(sale.id.clone()))
        .await
        .unwrap()
        .is_some());

    assert!(till
        .record_sale(None, vec![item("p1", 1, 450), item("nope", 1, 1)])
        .await
        .is_err());
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));
    assert_eq!(till.pending_mutations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_payloads_are_refused_before_writing() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    assert!(matches!(
        till.record_sale(None, vec![]).await,
        Err(TillError::Validation(ValidationError::NoItems(_)))
    ));
    assert!(matches!(
        till.record_sale(None, vec![item("p1", 0, 450)]).await,
        Err(TillError::Validation(ValidationError::NonPositiveQuantity { .. }))
    ));
    assert!(matches!(
        till.adjust_inventory("p1".into(), 0, None).await,
        Err(TillError::Validation(ValidationError::ZeroDelta))
    ));

    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(10));
    assert!(till.pending_mutations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_return_restocks_and_needs_original_sale() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    let (sale, _) = till
        .record_sale(None, vec![item("p1", 3, 450)])
        .await
        .unwrap();
    till.record_return(sale.id.clone(), vec![item("p1", 1, 450)], Some("damaged".into()))
        .await
        .unwrap();
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));

    assert!(till
        .record_return("s-unknown".into(), vec![item("p1", 1, 450)], None)
        .await
        .is_err());
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));

    let kinds: Vec<_> = till
        .pending_mutations()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![till::core::MutationKind::Sale, till::core::MutationKind::Return]
    );
}

#[tokio::test]
async fn test_status_subscription_tracks_log() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);
    let mut status = till.subscribe();

    till.record_sale(None, vec![item("p1", 1, 450)]).await.unwrap();
    till.adjust_inventory("p1".into(), 4, None).await.unwrap();

    status.changed().await.unwrap();
    assert_eq!(status.borrow_and_update().pending, 2);
    assert_eq!(till.status().to_string(), "pending: 2, errors: 0");

    till.sync_now().await.unwrap();
    assert!(status.borrow_and_update().is_drained());
}

#[tokio::test]
async fn test_amend_and_discard_failed_mutations() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    let (_, sale_id) = till
        .record_sale(None, vec![item("p1", 1, 450)])
        .await
        .unwrap();
    let (adjust_id, _) = till.adjust_inventory("p1".into(), 2, None).await.unwrap();
    fixture
        .server
        .override_ack(sale_id, till::sync::AckStatus::Rejected, "price changed");
    fixture
        .server
        .override_ack(adjust_id, till::sync::AckStatus::Rejected, "audit hold");

    till.sync_now().await.unwrap();
    let status = till.status();
    assert_eq!(status.errors, 2);
    assert_eq!(status.rejected, 2);

    // Pending records cannot be amended; kinds must match.
    let wrong_kind = MutationPayload::InventoryAdjustment {
        product_id: "p1".into(),
        delta: 1,
        reason: None,
    };
    assert!(matches!(
        till.amend(&sale_id, wrong_kind).await,
        Err(TillError::KindMismatch { .. })
    ));

    let record = till.store().get_mutation(&sale_id).await.unwrap().unwrap();
    let MutationPayload::Sale {
        sale_id: id,
        customer_id,
        ..
    } = record.payload
    else {
        panic!("expected a sale payload");
    };
    let fixed = MutationPayload::Sale {
        sale_id: id,
        customer_id,
        items: vec![item("p1", 1, 500)],
        total_cents: 500,
    };
    till.amend(&sale_id, fixed).await.unwrap();
    let amended = till.store().get_mutation(&sale_id).await.unwrap().unwrap();
    assert_eq!(amended.status, MutationStatus::Pending);
    assert_eq!(amended.attempt, 0);

    let discarded = till.discard(&adjust_id).await.unwrap();
    assert_eq!(discarded.id, adjust_id);
    assert!(till.store().get_mutation(&adjust_id).await.unwrap().is_none());

    fixture.server.clear_override(&sale_id);
    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 1);
    assert!(till.status().is_drained());
}

#[tokio::test]
async fn test_discard_refuses_pending_records() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);
    let (_, id) = till
        .record_sale(None, vec![item("p1", 1, 450)])
        .await
        .unwrap();

    assert!(matches!(
        till.discard(&id).await,
        Err(TillError::Store(StoreError::WrongStatus { .. }))
    ));
    assert!(till.resubmit(&id).await.is_err());
}

#[tokio::test]
async fn test_local_writes_continue_while_server_is_down() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);
    fixture.server.set_online(false);

    till.record_sale(None, vec![item("p1", 1, 450)]).await.unwrap();
    assert!(matches!(
        till.sync_now().await,
        Err(TillError::Sync(SyncError::Connectivity(_)))
    ));
    till.record_sale(None, vec![item("p1", 1, 450)]).await.unwrap();
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));
    assert_eq!(till.status().pending, 2);

    fixture.server.set_online(true);
    fixture.server.fail_next_pull(ScriptedFailure::ServerError);
    // Push succeeds, pull fails: acknowledged records are gone, cursor unset.
    assert!(till.sync_now().await.is_err());
    assert!(till.pending_mutations().await.unwrap().is_empty());
    assert_eq!(till.store().last_pulled_at().await.unwrap(), None);
}

#[tokio::test]
async fn test_committed_writes_succeed_when_status_refresh_fails() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let faulty = Arc::new(FaultyStore::new(fixture.store.clone()));
    let till = Till::new(
        faulty.clone(),
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        TillConfig::default(),
    );

    let (sale, _) = till
        .record_sale(None, vec![item("p1", 2, 450)])
        .await
        .unwrap();
    fixture
        .server
        .override_ack(sale_mutation(&till).await, till::sync::AckStatus::Rejected, "hold");
    till.sync_now().await.unwrap();
    let before = till.inventory_quantity(&"p1".into()).await.unwrap().unwrap();

    faulty.set_fail_log_counts(true);
    let (_, quantity) = till.adjust_inventory("p1".into(), 3, None).await.unwrap();
    assert_eq!(quantity, before + 3);
    till.record_return(sale.id.clone(), vec![item("p1", 1, 450)], None)
        .await
        .unwrap();
    till.resubmit(&sale_mutation(&till).await).await.unwrap();

    // Each write landed exactly once.
    assert_eq!(
        till.inventory_quantity(&"p1".into()).await.unwrap(),
        Some(before + 4)
    );
    assert_eq!(till.pending_mutations().await.unwrap().len(), 3);

    faulty.reset();
    till.engine().refresh_status().await.unwrap();
    assert_eq!(till.status().pending, 3);
}

async fn sale_mutation(till: &Till<FaultyStore, MemoryTransport>) -> till::MutationId {
    till.pending_mutations()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.kind == till::core::MutationKind::Sale)
        .map(|r| r.id)
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_cursor_is_running_max_of_pull_timestamps(batches in pull_batches(8)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = SqliteStore::open_memory().unwrap();
            let mut expected: Option<i64> = None;
            for (changes, timestamp) in &batches {
                let report = store.apply_pull(changes, *timestamp).await.unwrap();
                expected = Some(expected.map_or(*timestamp, |e| e.max(*timestamp)));
                prop_assert_eq!(Some(report.cursor), expected);
                prop_assert_eq!(store.last_pulled_at().await.unwrap(), expected);
            }
            Ok(())
        })?;
    }
}
