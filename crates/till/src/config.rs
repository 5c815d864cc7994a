//! Configuration for a [`Till`](crate::Till) instance.

use till_sync::SyncConfig;

/// Configuration for the Till API.
#[derive(Debug, Clone)]
pub struct TillConfig {
    /// Sync engine and worker configuration.
    pub sync: SyncConfig,
    /// Queued triggers before after-write notifications coalesce.
    pub trigger_capacity: usize,
}

impl Default for TillConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            trigger_capacity: 16,
        }
    }
}

impl TillConfig {
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_trigger_capacity(mut self, capacity: usize) -> Self {
        self.trigger_capacity = capacity.max(1);
        self
    }
}
