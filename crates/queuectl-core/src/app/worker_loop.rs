//! WorkerLoop - 1 つの worker identity の実行ループ
//!
//! # フロー
//! 1. 停止シグナルが立っていたら抜ける
//! 2. find_next_claimable → なければ poll_interval 待つ
//! 3. try_claim → 負けたらすぐ次へ
//! 4. 実行して結果を書き込み、pace_interval 待つ
//!
//! 実行中のコマンドは停止シグナルで中断しない。待機だけが中断される。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::lifecycle::LifecycleEngine;
use crate::config::WorkerSettings;
use crate::domain::{Decision, JobId, JobRecord, QueueError, Result, WorkerId};

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Nothing was claimable.
    Idle,

    /// Another worker claimed the candidate first.
    ClaimLost(JobId),

    Processed { job: JobId, decision: Decision },
}

pub struct WorkerLoop {
    worker: WorkerId,
    engine: Arc<LifecycleEngine>,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(worker: WorkerId, engine: Arc<LifecycleEngine>, settings: WorkerSettings) -> Self {
        Self {
            worker,
            engine,
            settings,
        }
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// One poll-claim-execute pass.
    pub async fn tick(&self) -> Result<Tick> {
        let now = self.engine.clock().now();
        let Some(candidate) = self.engine.store().find_next_claimable(now).await? else {
            return Ok(Tick::Idle);
        };
        self.try_process(candidate).await
    }

    pub(crate) async fn try_process(&self, candidate: JobRecord) -> Result<Tick> {
        let claimed = match self.engine.claim(&candidate, &self.worker).await {
            Ok(job) => job,
            Err(QueueError::ClaimConflict(id)) => {
                tracing::debug!(worker = %self.worker, job = %id, "lost claim race");
                return Ok(Tick::ClaimLost(id));
            }
            Err(e) => return Err(e),
        };

        let decision = self.engine.process(&claimed).await?;
        Ok(Tick::Processed {
            job: claimed.id,
            decision,
        })
    }

    /// Run until `shutdown_rx` turns true (or its sender is gone).
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(worker = %self.worker, "worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let pause = match self.tick().await {
                Ok(Tick::Idle) => {
                    tracing::debug!(worker = %self.worker, "no claimable job");
                    self.settings.poll_interval
                }
                Ok(Tick::ClaimLost(_)) => Duration::ZERO,
                Ok(Tick::Processed { .. }) => self.settings.pace_interval,
                // already logged by the engine
                Err(QueueError::Runner(_)) => self.settings.poll_interval,
                Err(e) => {
                    tracing::error!(worker = %self.worker, error = %e, "worker iteration failed");
                    self.settings.poll_interval
                }
            };

            if pause_or_stop(&mut shutdown_rx, pause).await {
                break;
            }
        }

        tracing::info!(worker = %self.worker, "worker stopped");
    }
}

/// Sleep for `pause` unless shutdown arrives first. Returns `true` to stop.
pub(crate) async fn pause_or_stop(shutdown_rx: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    if pause.is_zero() {
        return *shutdown_rx.borrow();
    }
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
        _ = tokio::time::sleep(pause) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::lifecycle::testing::ScriptedRunner;
    use crate::domain::JobState;
    use crate::impls::InMemoryJobStore;
    use crate::ports::{FixedClock, JobStore, WorkerRegistry};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::domain::ExecutionOutcome;
    use crate::ports::CommandRunner;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            pace_interval: Duration::ZERO,
            ..WorkerSettings::default()
        }
    }

    fn worker_over(
        store: Arc<dyn crate::ports::QueueStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> WorkerLoop {
        let clock = Arc::new(FixedClock::new(t0()));
        let engine = Arc::new(LifecycleEngine::new(store, runner, clock));
        WorkerLoop::new(WorkerId::generate(), engine, settings())
    }

    async fn enqueue(store: &InMemoryJobStore, id: &str) -> JobRecord {
        let job = JobRecord::new(JobId::from(id), format!("run {id}"), 3, t0());
        store.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn idle_when_queue_is_empty() {
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker_over(store, Arc::new(ScriptedRunner::default()));
        assert_eq!(worker.tick().await.unwrap(), Tick::Idle);
    }

    #[tokio::test]
    async fn processes_oldest_job_first() {
        let store = Arc::new(InMemoryJobStore::new());
        enqueue(&store, "a").await;
        enqueue(&store, "b").await;
        let runner = Arc::new(ScriptedRunner::default());
        let worker = worker_over(store.clone(), runner.clone());

        let tick = worker.tick().await.unwrap();
        assert_eq!(
            tick,
            Tick::Processed {
                job: JobId::from("a"),
                decision: Decision::Complete { attempts: 1 },
            }
        );
        assert_eq!(runner.seen(), vec!["run a".to_string()]);
        let b = store.get(&JobId::from("b")).await.unwrap().unwrap();
        assert_eq!(b.state, JobState::Pending);
    }

    #[tokio::test]
    async fn stale_candidate_reports_claim_lost() {
        let store = Arc::new(InMemoryJobStore::new());
        let candidate = enqueue(&store, "a").await;
        let runner = Arc::new(ScriptedRunner::default());
        let first = worker_over(store.clone(), runner.clone());
        let second = worker_over(store.clone(), runner.clone());

        // Both saw the job; the first one wins.
        first.try_process(candidate.clone()).await.unwrap();
        let tick = second.try_process(candidate).await.unwrap();
        assert_eq!(tick, Tick::ClaimLost(JobId::from("a")));
        assert_eq!(runner.seen().len(), 1);
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_on_signal() {
        let store = Arc::new(InMemoryJobStore::new());
        for id in ["a", "b", "c"] {
            enqueue(&store, id).await;
        }
        let worker = worker_over(store.clone(), Arc::new(ScriptedRunner::default()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        for _ in 0..200 {
            if store.count_by_state(JobState::Completed).await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.count_by_state(JobState::Completed).await.unwrap(), 3);
    }

    /// Blocks inside `run` until released, so a test can stop the loop mid-job.
    struct GatedRunner {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CommandRunner for GatedRunner {
        async fn run(&self, _command: &str) -> Result<ExecutionOutcome> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(ExecutionOutcome::success())
        }
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_job_finish() {
        let store = Arc::new(InMemoryJobStore::new());
        enqueue(&store, "a").await;
        enqueue(&store, "b").await;
        let runner = Arc::new(GatedRunner {
            started: Notify::new(),
            release: Notify::new(),
        });
        let worker = worker_over(store.clone(), runner.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        runner.started.notified().await;
        tx.send_replace(true);
        runner.release.notify_one();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let a = store.get(&JobId::from("a")).await.unwrap().unwrap();
        let b = store.get(&JobId::from("b")).await.unwrap().unwrap();
        assert_eq!(a.state, JobState::Completed);
        assert_eq!(b.state, JobState::Pending);
    }

    #[tokio::test]
    async fn pause_returns_when_sender_is_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(pause_or_stop(&mut rx, Duration::from_secs(60)).await);
    }

    /// In-memory store whose first `polls_failing` polls fail like a locked database.
    struct FlakyStore {
        inner: InMemoryJobStore,
        polls_failing: AtomicUsize,
    }

    impl FlakyStore {
        fn new(polls_failing: usize) -> Self {
            Self {
                inner: InMemoryJobStore::new(),
                polls_failing: AtomicUsize::new(polls_failing),
            }
        }

        fn failures_left(&self) -> usize {
            self.polls_failing.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn insert(&self, job: &JobRecord) -> Result<()> {
            self.inner.insert(job).await
        }

        async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
            self.inner.get(id).await
        }

        async fn find_next_claimable(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>> {
            let failing = self
                .polls_failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(QueueError::StoreFailure("database is locked".to_string()));
            }
            self.inner.find_next_claimable(now).await
        }

        async fn try_claim(
            &self,
            id: &JobId,
            worker: &WorkerId,
            now: DateTime<Utc>,
        ) -> Result<Option<JobRecord>> {
            self.inner.try_claim(id, worker, now).await
        }

        async fn complete(&self, id: &JobId, attempts: u32, now: DateTime<Utc>) -> Result<()> {
            self.inner.complete(id, attempts, now).await
        }

        async fn reschedule(
            &self,
            id: &JobId,
            attempts: u32,
            now: DateTime<Utc>,
            available_at: DateTime<Utc>,
            last_error: Option<&str>,
        ) -> Result<()> {
            self.inner
                .reschedule(id, attempts, now, available_at, last_error)
                .await
        }

        async fn kill(
            &self,
            id: &JobId,
            attempts: u32,
            now: DateTime<Utc>,
            last_error: Option<&str>,
        ) -> Result<()> {
            self.inner.kill(id, attempts, now, last_error).await
        }

        async fn revive_from_dead(&self, id: &JobId, now: DateTime<Utc>) -> Result<()> {
            self.inner.revive_from_dead(id, now).await
        }

        async fn reclaim_stale(
            &self,
            stale_before: DateTime<Utc>,
            live_since: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<u64> {
            self.inner.reclaim_stale(stale_before, live_since, now).await
        }

        async fn get_config(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_config(key).await
        }

        async fn set_config(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set_config(key, value).await
        }

        async fn count_by_state(&self, state: JobState) -> Result<u64> {
            self.inner.count_by_state(state).await
        }

        async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
            self.inner.list_by_state(state).await
        }
    }

    #[async_trait]
    impl WorkerRegistry for FlakyStore {
        async fn register_worker(
            &self,
            worker: &WorkerId,
            pid: u32,
            now: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.register_worker(worker, pid, now).await
        }

        async fn heartbeat(&self, worker: &WorkerId, now: DateTime<Utc>) -> Result<bool> {
            self.inner.heartbeat(worker, now).await
        }

        async fn deregister_worker(&self, worker: &WorkerId) -> Result<()> {
            self.inner.deregister_worker(worker).await
        }

        async fn request_stop(&self, live_since: DateTime<Utc>) -> Result<u64> {
            self.inner.request_stop(live_since).await
        }

        async fn prune_workers(&self, silent_before: DateTime<Utc>) -> Result<u64> {
            self.inner.prune_workers(silent_before).await
        }

        async fn count_live_workers(&self, since: DateTime<Utc>) -> Result<u64> {
            self.inner.count_live_workers(since).await
        }
    }

    #[tokio::test]
    async fn store_failure_while_polling_does_not_stop_the_loop() {
        let store = Arc::new(FlakyStore::new(1));
        let job = JobRecord::new(JobId::from("a"), "run a", 3, t0());
        store.insert(&job).await.unwrap();

        let worker = worker_over(store.clone(), Arc::new(ScriptedRunner::default()));
        assert!(matches!(worker.tick().await, Err(QueueError::StoreFailure(_))));
        store.polls_failing.store(1, Ordering::SeqCst);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        for _ in 0..200 {
            if store.count_by_state(JobState::Completed).await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.failures_left(), 0);
        let a = store.get(&JobId::from("a")).await.unwrap().unwrap();
        assert_eq!(a.state, JobState::Completed);
        assert_eq!(a.attempts, 1);
    }
}
