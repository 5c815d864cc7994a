//! The sync engine: one push phase, one pull phase, one cursor commit.
//!
//! ```text
//! run_cycle
//!   ├─ connectivity check ── offline ──> Offline (nothing touched)
//!   ├─ auth token ────────── none ─────> AuthRequired
//!   ├─ push: pending records in creation order, in batches with disjoint targets
//!   │    ack accepted/duplicate -> synced -> removed
//!   │    ack rejected           -> error (rejected, never retried)
//!   │    failed / no ack        -> error (transient, next_retry_at)
//!   └─ pull: changes since cursor, applied with the new cursor in one commit
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use till_core::{
    Clock, EntityRef, FailureClass, MutationFailure, MutationId, MutationRecord, MutationStatus,
    SystemClock,
};
use till_store::Store;

use crate::backoff::CycleBackoff;
use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::connectivity::{AuthProvider, AuthToken, ConnectivityMonitor};
use crate::error::{Result, SyncError};
use crate::messages::{AckStatus, PushRequest, WireMutation};
use crate::status::{EngineState, SyncOutcome, SyncReport, SyncStatus, SyncTrigger};
use crate::transport::Transport;

/// Orchestrates push/pull cycles against one local store.
///
/// At most one cycle runs at a time; a second caller waits for the first.
/// The engine is the only writer of the sync cursor.
pub struct SyncEngine<S: Store + ?Sized, T: Transport> {
    store: Arc<S>,
    transport: T,
    connectivity: Arc<dyn ConnectivityMonitor>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    /// Cycle backoff; holding the lock means a cycle is running.
    cycle: Mutex<CycleBackoff>,
    status: watch::Sender<SyncStatus>,
    cancel: CancelToken,
}

/// Per-cycle bookkeeping of the push phase.
#[derive(Default)]
struct PushState {
    /// Entities with an earlier mutation that is failing or held back.
    blocked: BTreeSet<EntityRef>,
    /// Earliest retry of a record that nothing earlier is holding back.
    next_retry_at: Option<i64>,
    report: SyncReport,
}

impl PushState {
    fn block(&mut self, record: &MutationRecord) {
        self.blocked.extend(record.targets());
    }

    fn is_blocked(&self, record: &MutationRecord) -> bool {
        record.targets().iter().any(|t| self.blocked.contains(t))
    }

    fn schedule(&mut self, at: i64) {
        self.next_retry_at = Some(self.next_retry_at.map_or(at, |t| t.min(at)));
    }
}

impl<S: Store + ?Sized, T: Transport> SyncEngine<S, T> {
    /// Create an engine over an opened store.
    pub fn new(
        store: Arc<S>,
        transport: T,
        connectivity: Arc<dyn ConnectivityMonitor>,
        auth: Arc<dyn AuthProvider>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            transport,
            connectivity,
            auth,
            clock: Arc::new(SystemClock),
            cycle: Mutex::new(CycleBackoff::new(config.cycle_backoff)),
            config,
            status,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the wall clock (tests use a `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.set_clock(clock);
        self
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Re-read counts and cursor from the store and publish them.
    pub async fn refresh_status(&self) -> Result<SyncStatus> {
        let counts = self.store.log_counts().await?;
        let cursor = self.store.last_pulled_at().await?;
        self.status.send_modify(|s| {
            s.set_counts(counts);
            s.last_pulled_at = cursor;
        });
        Ok(self.status())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────────────────

    /// Abort the running cycle and refuse new ones until [`resume`](Self::resume).
    pub fn cancel(&self) {
        info!("sync cancelled");
        self.cancel.cancel();
    }

    /// Allow cycles again (after login).
    pub fn resume(&self) {
        self.cancel.reset();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one sync attempt.
    ///
    /// `Err` is returned for cycle-level failures (server unreachable,
    /// pull failed, cancelled, store failure); the log and cursor are then
    /// exactly as a successful prefix of the cycle left them, and the
    /// cursor has not moved.
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        let mut cycle = self.cycle.lock().await;
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let now = self.clock.now_millis();
        if !trigger.bypasses_backoff() && cycle.is_active(now) {
            let until = cycle.until().unwrap_or(now);
            debug!(?trigger, until, "inside cycle backoff; skipping");
            return Ok(SyncOutcome::BackingOff { until });
        }

        if !self.connectivity.is_connected() {
            debug!(?trigger, "offline; skipping sync cycle");
            return Ok(SyncOutcome::Offline);
        }

        let Some(token) = self.auth.current_token() else {
            warn!("no credentials; sync paused");
            let outcome = Ok(SyncOutcome::AuthRequired);
            self.publish(EngineState::Idle, &outcome).await;
            return outcome;
        };

        self.status.send_modify(|s| {
            s.state = EngineState::Syncing;
            s.auth_required = false;
        });
        debug!(?trigger, "sync cycle started");

        let result = self.cycle_inner(&token).await;

        let state = match &result {
            Ok(SyncOutcome::Completed(_)) => {
                cycle.reset();
                EngineState::Idle
            }
            Err(e) if e.is_retryable() => {
                let until = cycle.record_failure(self.clock.now_millis());
                warn!(error = %e, failures = cycle.failures(), until, "sync cycle failed");
                EngineState::Backoff { until }
            }
            Err(e) => {
                warn!(error = %e, "sync cycle aborted");
                EngineState::Idle
            }
            Ok(_) => EngineState::Idle,
        };
        self.publish(state, &result).await;
        result
    }

    async fn cycle_inner(&self, token: &AuthToken) -> Result<SyncOutcome> {
        let cursor = self.store.last_pulled_at().await?;
        let mut push = PushState::default();

        match self.push_phase(token, cursor, &mut push).await {
            Ok(()) => {}
            Err(SyncError::Auth(reason)) => {
                warn!(%reason, "server refused credentials during push");
                return Ok(SyncOutcome::AuthRequired);
            }
            Err(e) => return Err(e),
        }

        let mut report = push.report;
        report.next_retry_at = push.next_retry_at;
        match self.pull_phase(token, cursor, &mut report).await {
            Ok(()) => {}
            Err(SyncError::Auth(reason)) => {
                warn!(%reason, "server refused credentials during pull");
                return Ok(SyncOutcome::AuthRequired);
            }
            Err(e) => return Err(e),
        }

        info!(
            pushed = report.pushed,
            acknowledged = report.acknowledged,
            rejected = report.rejected,
            failed = report.failed,
            held_back = report.held_back,
            pulled = report.pulled,
            cursor = ?report.cursor,
            "sync cycle completed"
        );
        Ok(SyncOutcome::Completed(report))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────────

    async fn push_phase(
        &self,
        token: &AuthToken,
        cursor: Option<i64>,
        push: &mut PushState,
    ) -> Result<()> {
        let pending = self.store.list_pending().await?;
        let now = self.clock.now_millis();
        let mut batch: Vec<MutationRecord> = Vec::new();
        let mut batch_targets = BTreeSet::new();

        for record in pending {
            let targets = record.targets();
            let full = batch.len() >= self.config.max_push_batch;
            if !batch.is_empty() && (full || !batch_targets.is_disjoint(&targets)) {
                // A later mutation of an entity is never in flight with an earlier one.
                self.send_batch(token, cursor, std::mem::take(&mut batch), push)
                    .await?;
                batch_targets.clear();
            }

            let blocked = push.is_blocked(&record);
            if blocked || !record.is_due(now) {
                debug!(mutation_id = %record.id, status = %record.status, blocked, "holding back mutation");
                // A blocked record waits for the record ahead of it, not for its own window.
                if !blocked {
                    if let Some(at) = record.next_retry_at {
                        push.schedule(at);
                    }
                }
                push.report.held_back += 1;
                push.block(&record);
                continue;
            }
            batch_targets.extend(targets);
            batch.push(record);
        }

        if !batch.is_empty() {
            self.send_batch(token, cursor, batch, push).await?;
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        token: &AuthToken,
        cursor: Option<i64>,
        batch: Vec<MutationRecord>,
        push: &mut PushState,
    ) -> Result<()> {
        let mut in_flight = Vec::with_capacity(batch.len());
        for record in &batch {
            if let Err(e) = self.mark_in_flight(record).await {
                self.restore(&in_flight).await;
                return Err(e);
            }
            in_flight.push((record.id, record.status));
        }

        let request = PushRequest {
            changes: batch.iter().map(WireMutation::from).collect(),
            last_pulled_at: cursor,
        };
        debug!(count = batch.len(), "pushing batch");

        let response = match self.call(self.transport.push(token, &request)).await {
            Ok(response) => response,
            Err(e) if e.is_cycle_fatal() => {
                self.restore(&in_flight).await;
                return Err(e);
            }
            Err(SyncError::ServerRejected(reason)) => {
                push.report.pushed += batch.len();
                for record in &batch {
                    self.fail_rejected(record, reason.clone(), push).await?;
                }
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, count = batch.len(), "push batch failed");
                push.report.pushed += batch.len();
                let message = e.to_string();
                for record in &batch {
                    self.fail_transient(record, message.clone(), push).await?;
                }
                return Ok(());
            }
        };

        push.report.pushed += batch.len();
        for record in &batch {
            match response.ack_for(&record.id) {
                Some(ack) if ack.status.is_acknowledged() => {
                    self.store.acknowledge(&record.id).await?;
                    debug!(mutation_id = %record.id, status = ?ack.status, "mutation acknowledged");
                    push.report.acknowledged += 1;
                }
                Some(ack) if ack.status == AckStatus::Rejected => {
                    let reason = ack
                        .reason
                        .clone()
                        .unwrap_or_else(|| "rejected by server".to_string());
                    self.fail_rejected(record, reason, push).await?;
                }
                other => {
                    let reason = other
                        .and_then(|ack| ack.reason.clone())
                        .unwrap_or_else(|| "not acknowledged".to_string());
                    self.fail_transient(record, reason, push).await?;
                }
            }
        }
        Ok(())
    }

    /// `pending -> syncing`, or `error -> pending -> syncing` on a retry.
    async fn mark_in_flight(&self, record: &MutationRecord) -> Result<()> {
        if record.status == MutationStatus::Error {
            self.store
                .mark_status(&record.id, MutationStatus::Pending, None)
                .await?;
        }
        self.store
            .mark_status(&record.id, MutationStatus::Syncing, None)
            .await?;
        Ok(())
    }

    /// Put in-flight records back to the status they had before the batch.
    async fn restore(&self, in_flight: &[(MutationId, MutationStatus)]) {
        for (id, prior) in in_flight {
            if let Err(e) = self.store.mark_status(id, *prior, None).await {
                warn!(mutation_id = %id, error = %e, "failed to restore mutation status");
            }
        }
    }

    async fn fail_transient(
        &self,
        record: &MutationRecord,
        message: String,
        push: &mut PushState,
    ) -> Result<()> {
        let attempt = record.attempt.saturating_add(1);
        let next_retry_at = self
            .config
            .backoff
            .retry_at(self.clock.now_millis(), attempt);
        warn!(
            mutation_id = %record.id,
            attempt,
            next_retry_at,
            error = %message,
            "push failed; retry scheduled"
        );
        self.store
            .record_failure(
                &record.id,
                &MutationFailure {
                    class: FailureClass::Transient,
                    message,
                    next_retry_at: Some(next_retry_at),
                },
            )
            .await?;
        push.block(record);
        push.schedule(next_retry_at);
        push.report.failed += 1;
        Ok(())
    }

    async fn fail_rejected(
        &self,
        record: &MutationRecord,
        message: String,
        push: &mut PushState,
    ) -> Result<()> {
        warn!(mutation_id = %record.id, error = %message, "mutation rejected by server");
        self.store
            .record_failure(
                &record.id,
                &MutationFailure {
                    class: FailureClass::Rejected,
                    message,
                    next_retry_at: None,
                },
            )
            .await?;
        push.block(record);
        push.report.rejected += 1;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────────

    async fn pull_phase(
        &self,
        token: &AuthToken,
        cursor: Option<i64>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let pulled = self.call(self.transport.pull(token, cursor)).await?;
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let applied = self
            .store
            .apply_pull(&pulled.changes, pulled.timestamp)
            .await?;
        debug!(
            applied = applied.applied,
            skipped = applied.skipped,
            cursor = applied.cursor,
            "applied pull batch"
        );
        report.pulled = applied.applied;
        report.skipped = applied.skipped;
        report.cursor = Some(applied.cursor);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Bound a network call by the request timeout and cancellation.
    async fn call<F, R>(&self, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(timeout, fut) => {
                result.unwrap_or_else(|_| Err(SyncError::Timeout(timeout)))
            }
        }
    }

    async fn publish(&self, state: EngineState, result: &Result<SyncOutcome>) {
        let counts = self.store.log_counts().await;
        let cursor = self.store.last_pulled_at().await;
        self.status.send_modify(|s| {
            s.state = state;
            match counts {
                Ok(counts) => s.set_counts(counts),
                Err(e) => warn!(error = %e, "failed to read log counts"),
            }
            if let Ok(cursor) = cursor {
                s.last_pulled_at = cursor;
            }
            match result {
                Ok(SyncOutcome::Completed(_)) => s.last_error = None,
                Ok(SyncOutcome::AuthRequired) => s.auth_required = true,
                Ok(_) => {}
                Err(e) => s.last_error = Some(e.to_string()),
            }
        });
    }
}
