//! QueueService - CLI から使う操作の窓口
//!
//! 入力検証と max_retries の解決以外のロジックは持たない。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::app::status::{StateCounts, StatusReport};
use crate::config::{ConfigResolver, WorkerSettings};
use crate::domain::{EnqueueRequest, JobId, JobRecord, JobState, QueueError, Result, timestamp};
use crate::ports::{Clock, QueueStore};

#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    config: ConfigResolver,
}

impl QueueService {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        let config = ConfigResolver::new(Arc::clone(&store));
        Self {
            store,
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

    /// Validate and persist a new pending job.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<JobRecord> {
        request.validate()?;
        let max_retries = self
            .config
            .effective_max_retries(request.max_retries)
            .await?;

        let job = JobRecord::new(
            JobId::new(request.id),
            request.command,
            max_retries,
            self.clock.now(),
        );
        self.store.insert(&job).await?;
        tracing::info!(job = %job.id, max_retries, "job enqueued");
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        self.store.get(id).await
    }

    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        self.store.list_by_state(state).await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let mut jobs = StateCounts::default();
        for state in JobState::ALL {
            jobs.set(state, self.store.count_by_state(state).await?);
        }

        let workers = self
            .store
            .count_live_workers(self.live_since().await?)
            .await?;

        Ok(StatusReport {
            total: jobs.total(),
            jobs,
            workers,
        })
    }

    pub async fn dlq_list(&self) -> Result<Vec<JobRecord>> {
        self.store.list_by_state(Some(JobState::Dead)).await
    }

    /// Move a dead job back to pending with a fresh retry budget.
    pub async fn dlq_retry(&self, id: &JobId) -> Result<()> {
        self.store.revive_from_dead(id, self.clock.now()).await?;
        tracing::info!(job = %id, "job revived from dead letter queue");
        Ok(())
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.store.get_config(key).await
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(QueueError::InvalidInput("config key is required".to_string()));
        }
        self.store.set_config(key, value).await
    }

    /// Ask every live worker (in any process) to stop. Returns how many were flagged.
    pub async fn stop_workers(&self) -> Result<u64> {
        let flagged = self.store.request_stop(self.live_since().await?).await?;
        tracing::info!(count = flagged, "stop requested");
        Ok(flagged)
    }

    pub async fn worker_settings(&self) -> Result<WorkerSettings> {
        self.config.worker_settings().await
    }

    /// Oldest heartbeat that still counts as a live worker.
    async fn live_since(&self) -> Result<DateTime<Utc>> {
        let window = self.config.worker_settings().await?.liveness_window();
        Ok(timestamp::saturating_sub(self.clock.now(), window))
    }
}
