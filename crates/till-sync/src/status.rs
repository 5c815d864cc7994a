//! Engine state, published status and cycle reports.

use std::fmt;

use till_store::LogCounts;

/// Protocol-level state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Waiting for a trigger.
    #[default]
    Idle,
    /// A cycle is running.
    Syncing,
    /// Scheduled triggers are held back until the cycle backoff elapses.
    Backoff {
        /// Unix ms at which the window closes.
        until: i64,
    },
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => f.write_str("idle"),
            EngineState::Syncing => f.write_str("syncing"),
            EngineState::Backoff { until } => write!(f, "backoff until {}", until),
        }
    }
}

/// Snapshot published to subscribers after every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub state: EngineState,
    /// Records awaiting a push.
    pub pending: usize,
    /// Records in `error`.
    pub errors: usize,
    /// Subset of `errors` that need discard or amend.
    pub rejected: usize,
    /// Pushing is halted until credentials refresh.
    pub auth_required: bool,
    pub last_pulled_at: Option<i64>,
    /// Message of the last cycle-level failure; cleared by a clean cycle.
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub(crate) fn set_counts(&mut self, counts: LogCounts) {
        self.pending = counts.pending;
        self.errors = counts.errors;
        self.rejected = counts.rejected;
    }

    /// Whether the log is empty.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.errors == 0
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending: {}, errors: {}", self.pending, self.errors)
    }
}

/// What woke the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    AppStart,
    /// Explicit refresh; bypasses the cycle backoff.
    Manual,
    AfterWrite,
    Timer,
    /// A record's retry window elapsed.
    Retry,
}

impl SyncTrigger {
    pub fn bypasses_backoff(&self) -> bool {
        matches!(self, SyncTrigger::Manual)
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records sent to the server.
    pub pushed: usize,
    /// Accepted or duplicate; now removed from the log.
    pub acknowledged: usize,
    /// Refused by the server; wait for the caller.
    pub rejected: usize,
    /// Failed transiently; retried after backoff.
    pub failed: usize,
    /// Not sent this cycle (ordering, backoff window or rejection).
    pub held_back: usize,
    /// Server changes written to the replica.
    pub pulled: usize,
    /// Server changes skipped by last-write-wins.
    pub skipped: usize,
    /// Cursor after the pull committed.
    pub cursor: Option<i64>,
    /// Earliest retry window of a record not held back behind another.
    pub next_retry_at: Option<i64>,
}

/// Result of one `run_cycle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The device is offline; nothing changed.
    Offline,
    /// No credentials, or the server refused them; nothing was pulled.
    AuthRequired,
    /// Scheduled trigger ignored inside the cycle backoff window.
    BackingOff { until: i64 },
    /// Push and pull both ran.
    Completed(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}
