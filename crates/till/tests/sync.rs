//! End-to-end sync behavior through the `Till` API.

use std::sync::Arc;
use std::time::Duration;

use till::core::Clock;
use till::store::{MemoryStore, SqliteStore, Store};
use till::sync::{
    AuthToken, BackoffPolicy, MemoryTransport, PushRequest, ScriptedFailure, SyncError,
    SyncTrigger, WireMutation,
};
use till::{
    EngineState, EntityRef, MutationPayload, MutationStatus, SyncConfig, SyncOutcome, Till,
    TillConfig, TillError,
};
use till_testkit::{item, FaultyStore, TestFixture};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> TillConfig {
    TillConfig::default().with_sync(
        SyncConfig::default()
            .with_request_timeout(Duration::from_millis(200))
            .with_backoff(BackoffPolicy::new(
                Duration::from_secs(1),
                Duration::from_secs(300),
            )),
    )
}

fn memory_till(fixture: &TestFixture) -> Till<MemoryStore, MemoryTransport> {
    Till::new(
        fixture.store.clone(),
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        config(),
    )
    .with_clock(Arc::new(fixture.clock.clone()))
}

#[tokio::test]
async fn test_sale_end_to_end_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fixture = TestFixture::new();
    let till = Till::open(
        dir.path().join("till.db"),
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        config(),
    )
    .unwrap()
    .with_clock(Arc::new(fixture.clock.clone()));
    fixture.stock_in(till.store().as_ref(), "p1", 10).await.unwrap();

    till.record_sale(None, vec![item("p1", 2, 450)]).await.unwrap();
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));
    assert_eq!(till.pending_mutations().await.unwrap().len(), 1);
    assert_eq!(till.status().pending, 1);

    fixture.server.set_time(5_000);
    let outcome = till.sync_now().await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.acknowledged, 1);

    assert!(till.pending_mutations().await.unwrap().is_empty());
    let cursor = till.store().last_pulled_at().await.unwrap();
    assert_eq!(cursor, Some(fixture.server.now()));
    assert!(cursor.unwrap() > 5_000);
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(8));
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(8));

    let status = till.status();
    assert!(status.is_drained());
    assert_eq!(status.last_pulled_at, cursor);
    assert_eq!(status.state, EngineState::Idle);
}

#[tokio::test]
async fn test_push_is_idempotent_when_ack_was_lost() {
    init_tracing();
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    let (_, id) = till
        .record_sale(None, vec![item("p1", 2, 450)])
        .await
        .unwrap();

    // An earlier attempt reached the server but its acknowledgment never arrived.
    let record = till.store().get_mutation(&id).await.unwrap().unwrap();
    fixture.server.handle_push(&PushRequest {
        changes: vec![WireMutation::from(&record)],
        last_pulled_at: None,
    });

    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 1);
    assert!(fixture.server.was_applied(&id));
    assert_eq!(fixture.server.received(), vec![id, id]);
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(8));
    assert!(till.pending_mutations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_offline_sync_is_a_no_op() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);
    fixture.connectivity.set_online(false);

    let (_, id) = till
        .record_sale(None, vec![item("p1", 1, 450)])
        .await
        .unwrap();

    assert_eq!(till.sync_now().await.unwrap(), SyncOutcome::Offline);
    let record = till.store().get_mutation(&id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::Pending);
    assert_eq!(record.attempt, 0);
    assert_eq!(till.store().last_pulled_at().await.unwrap(), None);
    assert!(fixture.server.received().is_empty());
    assert_eq!(till.status().state, EngineState::Idle);
}

#[tokio::test]
async fn test_failed_mutation_holds_back_later_writes_to_same_product() {
    init_tracing();
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    let (_, m1) = till
        .record_sale(None, vec![item("p1", 1, 450)])
        .await
        .unwrap();
    let (_, m2) = till
        .record_sale(None, vec![item("p1", 3, 450)])
        .await
        .unwrap();
    fixture.server.fail_next_push(ScriptedFailure::ServerError);

    let outcome = till.sync_now().await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.held_back, 1);

    let pending = till.pending_mutations().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, m1);
    assert_eq!(pending[0].status, MutationStatus::Error);
    assert!(pending[0].last_error.is_some());
    assert_eq!(pending[1].id, m2);
    assert_eq!(pending[1].status, MutationStatus::Pending);
    assert!(!fixture.server.received().contains(&m2));
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(10));

    // Once the retry window passes both go through, in order.
    fixture.clock.advance(2_000);
    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 2);
    assert_eq!(fixture.server.received(), vec![m1, m2]);
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(6));
}

#[tokio::test]
async fn test_record_backoff_doubles_until_success() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let engine = fixture.engine(config().sync);
    let payload = MutationPayload::InventoryAdjustment {
        product_id: "p1".into(),
        delta: 5,
        reason: None,
    };
    let id = fixture
        .store
        .enqueue(&payload, fixture.clock.now_millis())
        .await
        .unwrap();

    for k in 1..=4u32 {
        fixture.server.fail_next_push(ScriptedFailure::ServerError);
        let failed_at = fixture.clock.now_millis();
        engine.run_cycle(SyncTrigger::Manual).await.unwrap();

        let record = fixture.store.get_mutation(&id).await.unwrap().unwrap();
        assert_eq!(record.attempt, k);
        let next = record.next_retry_at.unwrap();
        assert_eq!(next, failed_at + 1_000 * (1i64 << k));

        // Not retried before the window elapses.
        let outcome = engine.run_cycle(SyncTrigger::Retry).await.unwrap();
        assert_eq!(outcome.report().unwrap().held_back, 1);
        assert!(fixture.server.received().is_empty());
        fixture.clock.set(next);
    }

    let outcome = engine.run_cycle(SyncTrigger::Retry).await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 1);
    assert!(fixture.store.get_mutation(&id).await.unwrap().is_none());
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(15));
}

#[tokio::test]
async fn test_rejected_mutation_waits_for_caller() {
    let fixture = TestFixture::new();
    let till = memory_till(&fixture);
    // Known locally, unknown to the server.
    fixture
        .stock_in(till.store().as_ref(), "p9", 4)
        .await
        .unwrap();
    fixture.server.delete_entity(till::EntityRef::inventory("p9"));

    let (id, quantity) = till.adjust_inventory("p9".into(), 2, None).await.unwrap();
    assert_eq!(quantity, 6);

    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().rejected, 1);
    let record = till.store().get_mutation(&id).await.unwrap().unwrap();
    assert!(record.is_rejected());
    assert_eq!(till.status().rejected, 1);

    fixture.clock.advance(86_400_000);
    till.sync_now().await.unwrap();
    assert_eq!(fixture.server.received(), vec![id]);

    // Server learns the product; the cashier resubmits.
    fixture.server.put_entity(till_testkit::inventory("p9", 4));
    till.resubmit(&id).await.unwrap();
    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 1);
    assert_eq!(fixture.server.inventory_quantity("p9"), Some(6));
    assert!(till.status().is_drained());
}

#[tokio::test]
async fn test_missing_credentials_pause_sync() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);
    fixture.auth.set_token(None);

    till.record_sale(None, vec![item("p1", 1, 450)]).await.unwrap();
    assert_eq!(till.sync_now().await.unwrap(), SyncOutcome::AuthRequired);
    assert!(till.status().auth_required);
    assert!(fixture.server.received().is_empty());

    fixture.auth.set_token(Some(AuthToken::new("test-token")));
    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 1);
    assert!(!till.status().auth_required);
}

#[tokio::test]
async fn test_logout_cancels_sync_but_not_writes() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    till.logout();
    till.record_sale(None, vec![item("p1", 1, 450)]).await.unwrap();
    assert!(matches!(
        till.sync_now().await,
        Err(TillError::Sync(SyncError::Cancelled))
    ));
    assert_eq!(till.pending_mutations().await.unwrap().len(), 1);

    till.login();
    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().acknowledged, 1);
}

#[tokio::test]
async fn test_cancel_mid_pull_keeps_cursor() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let engine = Arc::new(fixture.engine(
        SyncConfig::default().with_request_timeout(Duration::from_secs(30)),
    ));
    fixture.server.fail_next_pull(ScriptedFailure::Hang);

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_cycle(SyncTrigger::Manual).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(fixture.store.last_pulled_at().await.unwrap(), None);
}

#[tokio::test]
async fn test_worker_drains_log_after_write() {
    init_tracing();
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let mut till = memory_till(&fixture);
    let mut status = till.subscribe();
    till.start().await.unwrap();
    assert!(matches!(till.start().await, Err(TillError::AlreadyStarted)));

    till.record_sale(None, vec![item("p1", 2, 450)]).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            status.changed().await.unwrap();
            let current = status.borrow().clone();
            if current.state == EngineState::Idle
                && current.is_drained()
                && current.last_pulled_at.is_some()
                && fixture.server.inventory_quantity("p1") == Some(8)
            {
                break;
            }
        }
    })
    .await
    .unwrap();

    till.shutdown().await;
}

#[tokio::test]
async fn test_interrupted_push_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till.db");
    let fixture = TestFixture::new();

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        fixture.stock_in(&store, "p1", 10).await.unwrap();
        let payload = MutationPayload::InventoryAdjustment {
            product_id: "p1".into(),
            delta: -1,
            reason: None,
        };
        let id = store.enqueue(&payload, fixture.clock.now_millis()).await.unwrap();
        // Crash while the record was in flight.
        store
            .mark_status(&id, MutationStatus::Syncing, None)
            .await
            .unwrap();
        id
    };

    let mut till = Till::open(
        &path,
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        config(),
    )
    .unwrap();
    till.start().await.unwrap();
    let outcome = till.sync_now().await.unwrap();
    assert!(outcome.report().is_some());
    assert!(till.store().get_mutation(&id).await.unwrap().is_none());
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(9));
    till.shutdown().await;
}

#[tokio::test]
async fn test_pull_applies_server_changes_last_write_wins() {
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let till = memory_till(&fixture);

    till.sync_now().await.unwrap();
    let first = till.store().last_pulled_at().await.unwrap().unwrap();

    // Restock on the back office.
    fixture.server.put_entity(till_testkit::inventory("p1", 40));
    fixture.server.put_entity(till_testkit::product("p2", 250));
    let outcome = till.sync_now().await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.pulled, 2);

    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(40));
    assert!(till
        .entity(&till::EntityRef::product("p2"))
        .await
        .unwrap()
        .is_some());
    let second = till.store().last_pulled_at().await.unwrap().unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_ack_lost_locally_is_resent_after_restart() {
    init_tracing();
    let fixture = TestFixture::new();
    fixture.stock("p1", 10).await.unwrap();
    let faulty = Arc::new(FaultyStore::new(fixture.store.clone()));
    let till = Till::new(
        faulty.clone(),
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        config(),
    );

    let (_, id) = till
        .record_sale(None, vec![item("p1", 2, 450)])
        .await
        .unwrap();
    faulty.set_fail_acknowledge(true);
    assert!(matches!(
        till.sync_now().await,
        Err(TillError::Sync(SyncError::Store(_)))
    ));
    // The server applied it; locally it is still in flight.
    assert!(fixture.server.was_applied(&id));
    let record = fixture.store.get_mutation(&id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::Syncing);
    drop(till);

    let mut till = memory_till(&fixture);
    till.start().await.unwrap();
    let outcome = till.sync_now().await.unwrap();
    assert!(outcome.report().is_some());
    assert!(fixture.store.get_mutation(&id).await.unwrap().is_none());
    assert_eq!(fixture.server.received(), vec![id, id]);
    assert_eq!(fixture.server.inventory_quantity("p1"), Some(8));
    till.shutdown().await;
}

#[tokio::test]
async fn test_sale_during_stalled_push_waits_for_next_cycle() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    fixture.stock_in(store.as_ref(), "p1", 10).await.unwrap();
    let till = Arc::new(Till::new(
        store,
        fixture.transport(),
        fixture.connectivity.clone(),
        fixture.auth.clone(),
        config(),
    ));
    let (adjust_id, _) = till.adjust_inventory("p1".into(), 5, None).await.unwrap();
    fixture.server.fail_next_push(ScriptedFailure::Hang);

    let cycle = {
        let till = till.clone();
        tokio::spawn(async move { till.sync_now().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The push is parked until the request timeout; the store stays writable.
    let (sale, sale_id) = tokio::time::timeout(
        Duration::from_millis(150),
        till.record_sale(None, vec![item("p1", 2, 450)]),
    )
    .await
    .expect("sale blocked behind the sync cycle")
    .unwrap();
    assert_eq!(till.inventory_quantity(&"p1".into()).await.unwrap(), Some(13));
    assert!(till
        .entity(&EntityRef::sale(sale.id.clone()))
        .await
        .unwrap()
        .is_some());

    let outcome = cycle.await.unwrap().unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.failed, 1);
    let adjust = till.store().get_mutation(&adjust_id).await.unwrap().unwrap();
    assert_eq!(adjust.status, MutationStatus::Error);
    let record = till.store().get_mutation(&sale_id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::Pending);

    // Same product as the failed adjustment: held back until it goes through.
    let outcome = till.sync_now().await.unwrap();
    assert_eq!(outcome.report().unwrap().held_back, 2);
    assert!(!fixture.server.received().contains(&sale_id));
    assert_eq!(till.pending_mutations().await.unwrap().len(), 2);
}
