//! Configuration for sync behavior.

use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Configuration for the sync engine and its background worker.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound for every network call.
    pub request_timeout: Duration,
    /// Maximum mutations per push request.
    pub max_push_batch: usize,
    /// Period of the background timer trigger.
    pub sync_interval: Duration,
    /// Per-record retry policy.
    pub backoff: BackoffPolicy,
    /// Cycle-wide policy while the server keeps failing.
    pub cycle_backoff: BackoffPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_push_batch: 50,
            sync_interval: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            cycle_backoff: BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(600)),
        }
    }
}

impl SyncConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the push batch size (clamped to `1..=limits::MAX_PUSH_BATCH`).
    pub fn with_max_push_batch(mut self, max: usize) -> Self {
        self.max_push_batch = max.clamp(1, crate::messages::limits::MAX_PUSH_BATCH);
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cycle_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.cycle_backoff = backoff;
        self
    }
}
