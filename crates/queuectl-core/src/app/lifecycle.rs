//! LifecycleEngine - claim → run → decide → persist
//!
//! # フロー
//! 1. `claim`: 条件付き UPDATE で pending → processing（負けたら ClaimConflict）
//! 2. `process`: CommandRunner でコマンドを実行
//! 3. DefaultDecider で次の状態を決める（純粋関数）
//! 4. 決定をストアに書き込む
//!
//! Runner fault（コマンドを起動できなかった）は attempt に数えない。
//! 行は processing のまま残し、reaper に回収させる。

use std::sync::Arc;

use crate::config::ConfigResolver;
use crate::domain::retry::DEFAULT_BACKOFF_BASE;
use crate::domain::{
    Decider, Decision, DefaultDecider, JobRecord, QueueError, Result, RetryPolicy, WorkerId,
};
use crate::ports::{Clock, CommandRunner, QueueStore};

pub struct LifecycleEngine {
    store: Arc<dyn QueueStore>,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    config: ConfigResolver,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = ConfigResolver::new(store.clone());
        Self {
            store,
            runner,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &ConfigResolver {
        &self.config
    }

    /// Take ownership of `job` for `worker`.
    ///
    /// Returns the job as the claim wrote it, or `ClaimConflict` if another worker got
    /// there first (or the job is no longer eligible). `job` is only a candidate; its
    /// `attempts` may be stale by the time the claim lands.
    pub async fn claim(&self, job: &JobRecord, worker: &WorkerId) -> Result<JobRecord> {
        let now = self.clock.now();
        let Some(claimed) = self.store.try_claim(&job.id, worker, now).await? else {
            return Err(QueueError::ClaimConflict(job.id.clone()));
        };

        tracing::info!(
            worker = %worker,
            job = %claimed.id,
            attempts = claimed.attempts,
            "claimed job"
        );
        Ok(claimed)
    }

    /// Run a claimed job and record what happened.
    pub async fn process(&self, job: &JobRecord) -> Result<Decision> {
        let outcome = match self.runner.run(&job.command).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    job = %job.id,
                    error = %e,
                    "runner fault; job left in processing for reclaim"
                );
                return Err(e);
            }
        };

        let decider = self.decider().await;
        let now = self.clock.now();
        let decision = decider.decide(job, &outcome, now);
        self.apply(job, &decision, now).await?;
        Ok(decision)
    }

    /// Persist `decision` for `job`.
    pub async fn apply(
        &self,
        job: &JobRecord,
        decision: &Decision,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        match decision {
            Decision::Complete { attempts } => {
                self.store.complete(&job.id, *attempts, now).await?;
                tracing::info!(job = %job.id, attempts, "job completed");
            }
            Decision::Retry {
                attempts,
                delay,
                available_at,
                reason,
            } => {
                self.store
                    .reschedule(&job.id, *attempts, now, *available_at, Some(reason.as_str()))
                    .await?;
                tracing::warn!(
                    job = %job.id,
                    attempts,
                    delay_secs = delay.num_seconds(),
                    error = %reason,
                    "job failed; retry scheduled"
                );
            }
            Decision::MarkDead { attempts, reason } => {
                self.store
                    .kill(&job.id, *attempts, now, Some(reason.as_str()))
                    .await?;
                tracing::warn!(
                    job = %job.id,
                    attempts,
                    error = %reason,
                    "job moved to dead letter queue"
                );
            }
        }
        Ok(())
    }

    /// Decider with the `backoff_base` currently configured.
    async fn decider(&self) -> DefaultDecider {
        let base = match self.config.backoff_base().await {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!(error = %e, "could not read backoff_base; using default");
                DEFAULT_BACKOFF_BASE
            }
        };
        DefaultDecider::new(RetryPolicy::new(base))
    }
}
