//! JobStore port - 永続化されたジョブテーブルと config テーブル
//!
//! JobStore は以下を管理します：
//! - ジョブの状態（JobState, attempts, available_at）
//! - key/value 設定（max_retries, backoff_base, ...）
//!
//! # 並行性の設計原則
//! - `pending → processing` は `try_claim` の条件付き UPDATE（CAS）だけで行う
//! - それ以外の遷移は processing を保持している worker だけが行うので、通常の UPDATE で良い

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobRecord, JobState, Result, WorkerId};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. `DuplicateId` if the id is taken.
    ///
    /// The row is written as given; callers pass a fresh `JobRecord::new`.
    async fn insert(&self, job: &JobRecord) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>>;

    /// Oldest pending job whose backoff gate has passed.
    async fn find_next_claimable(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>>;

    /// Atomically move `id` from pending to processing.
    ///
    /// Returns the row as written by the claim, or `None` if it was not pending (or not
    /// yet eligible) at the time of the write, which means another worker won the race.
    /// Callers must continue from the returned row: a candidate read earlier may carry
    /// an older `attempts`.
    async fn try_claim(
        &self,
        id: &JobId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>>;

    async fn complete(&self, id: &JobId, attempts: u32, now: DateTime<Utc>) -> Result<()>;

    async fn reschedule(
        &self,
        id: &JobId,
        attempts: u32,
        now: DateTime<Utc>,
        available_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()>;

    async fn kill(
        &self,
        id: &JobId,
        attempts: u32,
        now: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// DLQ retry. `NotFound` unless `id` exists and is dead.
    async fn revive_from_dead(&self, id: &JobId, now: DateTime<Utc>) -> Result<()>;

    /// Move orphaned `processing` (and leftover `failed`) rows back to pending.
    ///
    /// A row qualifies when `updated_at < stale_before` and its `claimed_by` worker has
    /// not heartbeated since `live_since`. Returns the number of rows moved.
    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    async fn count_by_state(&self, state: JobState) -> Result<u64>;

    /// Jobs in `state` (or all jobs), oldest first.
    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<JobRecord>>;
}
