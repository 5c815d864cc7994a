//! Background task that turns triggers into sync cycles.
//!
//! Triggers arrive over a bounded channel (app start, after-write, manual
//! refresh), from a periodic timer, and from a retry deadline derived from
//! the last cycle. Cycles never overlap: the loop runs them one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use till_store::Store;

use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::status::{EngineState, SyncOutcome, SyncTrigger};
use crate::transport::Transport;

enum Command {
    Sync {
        trigger: SyncTrigger,
        reply: Option<oneshot::Sender<Result<SyncOutcome>>>,
    },
    Shutdown,
}

/// Handle to a running sync worker.
pub struct WorkerHandle {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Spawn the worker loop for `engine` on the current runtime.
///
/// `capacity` bounds queued triggers; fire-and-forget triggers beyond it
/// are dropped since the queued cycle will cover them.
pub fn spawn_worker<S, T>(engine: Arc<SyncEngine<S, T>>, capacity: usize) -> WorkerHandle
where
    S: Store + ?Sized + 'static,
    T: Transport + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(engine, rx));
    WorkerHandle { tx, task }
}

impl WorkerHandle {
    /// Request a cycle after a local write. Coalesces with queued triggers.
    pub fn notify_write(&self) {
        self.trigger(SyncTrigger::AfterWrite);
    }

    /// Request the start-up cycle.
    pub fn app_start(&self) {
        self.trigger(SyncTrigger::AppStart);
    }

    fn trigger(&self, trigger: SyncTrigger) {
        let command = Command::Sync {
            trigger,
            reply: None,
        };
        if let Err(e) = self.tx.try_send(command) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    debug!(?trigger, "trigger queue full; coalesced")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!(?trigger, "sync worker stopped; trigger dropped")
                }
            }
        }
    }

    /// Run a manual cycle and wait for its outcome.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Sync {
                trigger: SyncTrigger::Manual,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SyncError::WorkerStopped)?;
        response.await.map_err(|_| SyncError::WorkerStopped)?
    }

    /// Stop the loop after the current cycle and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync worker panicked");
        }
    }
}

async fn run<S, T>(engine: Arc<SyncEngine<S, T>>, mut rx: mpsc::Receiver<Command>)
where
    S: Store + ?Sized + 'static,
    T: Transport + 'static,
{
    let mut ticker = interval(engine.config().sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; start-up has its own trigger.
    ticker.tick().await;
    let mut retry_at: Option<Instant> = None;

    info!("sync worker started");
    loop {
        let retry = async move {
            match retry_at {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let (trigger, reply) = tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Sync { trigger, reply }) => (trigger, reply),
                Some(Command::Shutdown) | None => break,
            },
            _ = ticker.tick() => (SyncTrigger::Timer, None),
            _ = retry => (SyncTrigger::Retry, None),
        };

        let result = engine.run_cycle(trigger).await;
        match &result {
            Ok(outcome) => debug!(?trigger, ?outcome, "sync cycle finished"),
            Err(e) => warn!(?trigger, error = %e, "sync cycle failed"),
        }
        retry_at = next_wake(&engine, &result);
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
    info!("sync worker stopped");
}

/// When the loop should run a `Retry` cycle without any other trigger.
fn next_wake<S, T>(engine: &SyncEngine<S, T>, result: &Result<SyncOutcome>) -> Option<Instant>
where
    S: Store + ?Sized,
    T: Transport,
{
    let wall = match result {
        Ok(SyncOutcome::Completed(report)) => report.next_retry_at,
        Ok(SyncOutcome::BackingOff { until }) => Some(*until),
        Err(e) if e.is_retryable() => match engine.status().state {
            EngineState::Backoff { until } => Some(until),
            _ => None,
        },
        _ => None,
    }?;
    let wait = wall.saturating_sub(engine.clock().now_millis()).max(0);
    Some(Instant::now() + Duration::from_millis(u64::try_from(wait).unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use till_core::{Entity, InventoryLine, MutationPayload};
    use till_store::MemoryStore;

    use crate::backoff::BackoffPolicy;
    use crate::config::SyncConfig;
    use crate::connectivity::{StaticAuth, StaticConnectivity};
    use crate::transport::memory::{MemoryServer, MemoryTransport, ScriptedFailure};

    async fn setup(
        config: SyncConfig,
    ) -> (Arc<SyncEngine<MemoryStore, MemoryTransport>>, Arc<MemoryServer>) {
        let store = Arc::new(MemoryStore::new());
        let server = MemoryServer::new();
        let line = Entity::Inventory(InventoryLine {
            product_id: "p1".into(),
            quantity: 10,
            updated_at: 0,
            last_synced_at: None,
        });
        server.put_entity(line.clone());
        store.upsert_entity(&line).await.unwrap();
        let engine = SyncEngine::new(
            store,
            MemoryTransport::new(server.clone()),
            Arc::new(StaticConnectivity::online()),
            Arc::new(StaticAuth::with_token("t")),
            config,
        );
        (Arc::new(engine), server)
    }

    async fn enqueue_adjustment(engine: &SyncEngine<MemoryStore, MemoryTransport>) {
        let payload = MutationPayload::InventoryAdjustment {
            product_id: "p1".into(),
            delta: -1,
            reason: None,
        };
        engine
            .store()
            .enqueue(&payload, engine.clock().now_millis())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_now_returns_outcome() {
        let (engine, server) = setup(SyncConfig::default()).await;
        enqueue_adjustment(&engine).await;
        let worker = spawn_worker(engine.clone(), 4);

        let outcome = worker.sync_now().await.unwrap();
        assert_eq!(outcome.report().unwrap().acknowledged, 1);
        assert_eq!(server.inventory_quantity("p1"), Some(9));

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_after_write_trigger_drains_log() {
        let (engine, _server) = setup(SyncConfig::default()).await;
        let mut status = engine.subscribe();
        let worker = spawn_worker(engine.clone(), 4);

        enqueue_adjustment(&engine).await;
        worker.notify_write();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                status.changed().await.unwrap();
                let current = status.borrow().clone();
                if current.state == EngineState::Idle && current.is_drained() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert!(engine.store().list_pending().await.unwrap().is_empty());

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_record_is_retried_without_trigger() {
        let config = SyncConfig::default().with_backoff(BackoffPolicy::new(
            Duration::from_millis(20),
            Duration::from_millis(50),
        ));
        let (engine, server) = setup(config).await;
        enqueue_adjustment(&engine).await;
        server.fail_next_push(ScriptedFailure::ServerError);
        let worker = spawn_worker(engine.clone(), 4);

        let outcome = worker.sync_now().await.unwrap();
        assert_eq!(outcome.report().unwrap().failed, 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !engine.store().list_pending().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(server.inventory_quantity("p1"), Some(9));

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_now_after_shutdown_fails() {
        let (engine, _server) = setup(SyncConfig::default()).await;
        let worker = spawn_worker(engine, 4);
        let tx = worker.tx.clone();
        worker.shutdown().await;

        let (reply, _response) = oneshot::channel();
        assert!(tx
            .send(Command::Sync {
                trigger: SyncTrigger::Manual,
                reply: Some(reply),
            })
            .await
            .is_err());
    }
}
