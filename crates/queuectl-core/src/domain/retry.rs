//! Retry policy: decides backoff delays.

use chrono::Duration;

/// Upper bound on a single backoff delay (30 days).
pub const MAX_BACKOFF_SECS: u64 = 30 * 24 * 60 * 60;

pub const DEFAULT_BACKOFF_BASE: u64 = 2;

/// Exponential backoff on the attempt count.
///
/// delay = base ^ attempts seconds, where `attempts` is the count *after* the failed
/// execution (1-indexed). With base = 2:
/// - first failure: 2s
/// - second failure: 4s
/// - third failure: 8s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: u64,
}

impl RetryPolicy {
    /// A base below 1 would make every retry immediate or negative; fall back to the default.
    pub fn new(backoff_base: u64) -> Self {
        let backoff_base = if backoff_base == 0 {
            DEFAULT_BACKOFF_BASE
        } else {
            backoff_base
        };
        Self { backoff_base }
    }

    pub fn delay_secs(&self, attempts: u32) -> u64 {
        self.backoff_base
            .checked_pow(attempts)
            .unwrap_or(u64::MAX)
            .min(MAX_BACKOFF_SECS)
    }

    pub fn next_delay(&self, attempts: u32) -> Duration {
        // delay_secs is clamped well inside i64 range.
        Duration::seconds(self.delay_secs(attempts) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE)
    }
}
