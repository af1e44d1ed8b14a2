//! Runtime configuration stored in the `config` table.
//!
//! Every setting is an integer kept as text. A missing or non-numeric value falls
//! back to the hard-coded default; `config set` never validates.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::Result;
use crate::domain::retry::DEFAULT_BACKOFF_BASE;
use crate::ports::QueueStore;

pub mod keys {
    pub const MAX_RETRIES: &str = "max_retries";
    pub const BACKOFF_BASE: &str = "backoff_base";
    pub const POLL_INTERVAL_MS: &str = "poll_interval_ms";
    pub const PACE_INTERVAL_MS: &str = "pace_interval_ms";
    pub const STALE_AFTER_SECS: &str = "stale_after_secs";
    pub const HEARTBEAT_INTERVAL_MS: &str = "heartbeat_interval_ms";
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_PACE_INTERVAL_MS: u64 = 0;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;

/// A worker counts as alive if it heartbeated within this many heartbeat intervals.
pub const LIVENESS_HEARTBEATS: u32 = 3;

/// `raw` as an integer, or `fallback` when absent or not a number.
pub fn parse_int(raw: Option<&str>, fallback: i64) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(fallback)
}

/// Like [`parse_int`], but values below `min` also fall back.
fn parse_at_least(raw: Option<&str>, min: i64, fallback: u64) -> u64 {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(v) if v >= min => v as u64,
        _ => fallback,
    }
}

/// Timing knobs for a worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Idle wait when nothing is claimable (and after a store failure).
    pub poll_interval: Duration,

    /// Pause after finishing a job. Zero means poll again right away.
    pub pace_interval: Duration,

    /// Age after which an orphaned `processing` job is reclaimed. Zero disables reclaim.
    pub stale_after: Duration,

    /// Heartbeat and stop-flag check cadence.
    pub heartbeat_interval: Duration,
}

impl WorkerSettings {
    /// How far back a heartbeat may be for its worker to count as alive.
    /// Saturates instead of overflowing for absurd heartbeat intervals.
    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval
            .checked_mul(LIVENESS_HEARTBEATS)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            pace_interval: Duration::from_millis(DEFAULT_PACE_INTERVAL_MS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// Reads settings from the store.
#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<dyn QueueStore>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_int(&self, key: &str, fallback: i64) -> Result<i64> {
        let raw = self.store.get_config(key).await?;
        Ok(parse_int(raw.as_deref(), fallback))
    }

    /// Configured default retry limit. Values below 1 are ignored.
    pub async fn default_max_retries(&self) -> Result<u32> {
        let raw = self.store.get_config(keys::MAX_RETRIES).await?;
        let value = parse_at_least(raw.as_deref(), 1, u64::from(DEFAULT_MAX_RETRIES));
        Ok(u32::try_from(value).unwrap_or(u32::MAX))
    }

    /// Retry limit for a new job: explicit value > configured `max_retries` > 3.
    pub async fn effective_max_retries(&self, explicit: Option<i64>) -> Result<u32> {
        match explicit {
            Some(n) if n >= 1 => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => self.default_max_retries().await,
        }
    }

    /// Base of the exponential backoff. Values below 1 are ignored.
    pub async fn backoff_base(&self) -> Result<u64> {
        let raw = self.store.get_config(keys::BACKOFF_BASE).await?;
        Ok(parse_at_least(raw.as_deref(), 1, DEFAULT_BACKOFF_BASE))
    }

    pub async fn worker_settings(&self) -> Result<WorkerSettings> {
        let poll = self.store.get_config(keys::POLL_INTERVAL_MS).await?;
        let pace = self.store.get_config(keys::PACE_INTERVAL_MS).await?;
        let stale = self.store.get_config(keys::STALE_AFTER_SECS).await?;
        let heartbeat = self.store.get_config(keys::HEARTBEAT_INTERVAL_MS).await?;

        Ok(WorkerSettings {
            poll_interval: Duration::from_millis(parse_at_least(
                poll.as_deref(),
                1,
                DEFAULT_POLL_INTERVAL_MS,
            )),
            pace_interval: Duration::from_millis(parse_at_least(
                pace.as_deref(),
                0,
                DEFAULT_PACE_INTERVAL_MS,
            )),
            stale_after: Duration::from_secs(parse_at_least(
                stale.as_deref(),
                0,
                DEFAULT_STALE_AFTER_SECS,
            )),
            heartbeat_interval: Duration::from_millis(parse_at_least(
                heartbeat.as_deref(),
                1,
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )),
        })
    }
}
