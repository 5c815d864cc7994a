//! Exponential backoff for failed pushes and failing cycles.

use std::time::Duration;

/// `delay(attempt) = min(base * 2^attempt, max)`, without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit.
    pub base: Duration,
    /// Cap for exponential growth.
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Set the delay unit.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the cap.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Delay after `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base.saturating_mul(factor).min(max))
    }

    /// Wall-clock time (Unix ms) at which a retry is due.
    pub fn retry_at(&self, now_millis: i64, attempt: u32) -> i64 {
        let delay = i64::try_from(self.delay(attempt).as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_add(delay)
    }
}

impl Default for BackoffPolicy {
    /// 1s base, 5 minute cap.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5 * 60),
        }
    }
}

/// Cycle-wide backoff, engaged while the server keeps failing at the
/// cycle level even though the device reports being online.
#[derive(Debug, Clone)]
pub struct CycleBackoff {
    policy: BackoffPolicy,
    failures: u32,
    until: Option<i64>,
}

impl CycleBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            until: None,
        }
    }

    /// Count a failed cycle and return the end of the new window.
    pub fn record_failure(&mut self, now_millis: i64) -> i64 {
        self.failures = self.failures.saturating_add(1);
        let until = self.policy.retry_at(now_millis, self.failures - 1);
        self.until = Some(until);
        until
    }

    /// A fully successful cycle closes the window.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.until = None;
    }

    /// Whether scheduled triggers are held back at `now_millis`.
    pub fn is_active(&self, now_millis: i64) -> bool {
        self.until.is_some_and(|until| now_millis < until)
    }

    pub fn until(&self) -> Option<i64> {
        self.until
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
