//! WorkerRegistry port - 稼働中 worker の登録と停止要求
//!
//! worker は別プロセスで動くことがあるので、`worker stop` はストア経由で届ける。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Result, WorkerId};

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn register_worker(&self, worker: &WorkerId, pid: u32, now: DateTime<Utc>) -> Result<()>;

    /// Refresh liveness. Returns whether a stop has been requested for this worker.
    async fn heartbeat(&self, worker: &WorkerId, now: DateTime<Utc>) -> Result<bool>;

    async fn deregister_worker(&self, worker: &WorkerId) -> Result<()>;

    /// Ask every worker that heartbeated at or after `live_since` to stop. Returns how
    /// many were flagged.
    async fn request_stop(&self, live_since: DateTime<Utc>) -> Result<u64>;

    /// Delete rows of workers silent since before `silent_before` (crashed processes).
    /// Returns how many were removed.
    async fn prune_workers(&self, silent_before: DateTime<Utc>) -> Result<u64>;

    /// Workers that heartbeated at or after `since`.
    async fn count_live_workers(&self, since: DateTime<Utc>) -> Result<u64>;
}
