//! ReaperLoop - 持ち主のいない processing ジョブと worker 行の回収
//!
//! # フロー
//! 1. `updated_at` が stale_after より古い processing（と過去の failed）行を探す
//! 2. claimed_by の worker が liveness window 内に heartbeat していなければ pending に戻す
//! 3. liveness window より長く heartbeat のない worker 行（クラッシュしたプロセス）を消す
//!
//! attempts は変えない（実行結果が記録されていないため）。
//! 1-2 は stale_after = 0 で無効になるが、3 は常に行う。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::worker_loop::pause_or_stop;
use crate::config::WorkerSettings;
use crate::domain::{Result, timestamp};
use crate::ports::{Clock, QueueStore};

pub struct ReaperLoop {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    liveness_window: Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>, settings: &WorkerSettings) -> Self {
        Self {
            store,
            clock,
            stale_after: settings.stale_after,
            liveness_window: settings.liveness_window(),
            interval: settings.heartbeat_interval,
        }
    }

    /// Job reclaim disabled (`stale_after_secs = 0`). Worker rows are still pruned.
    pub fn is_disabled(&self) -> bool {
        self.stale_after.is_zero()
    }

    /// One pass: reclaim orphaned jobs, then prune silent worker rows.
    pub async fn tick(&self) -> Result<Reaped> {
        let now = self.clock.now();
        let live_since = timestamp::saturating_sub(now, self.liveness_window);

        let mut reaped = Reaped::default();
        if !self.is_disabled() {
            let stale_before = timestamp::saturating_sub(now, self.stale_after);
            reaped.jobs = self.store.reclaim_stale(stale_before, live_since, now).await?;
            if reaped.jobs > 0 {
                tracing::warn!(count = reaped.jobs, "reclaimed stale jobs");
            }
        }

        reaped.workers = self.store.prune_workers(live_since).await?;
        if reaped.workers > 0 {
            tracing::warn!(count = reaped.workers, "removed rows of silent workers");
        }
        Ok(reaped)
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        if self.is_disabled() {
            tracing::debug!("stale reclaim disabled");
        }
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "reaper pass failed");
            }
            if pause_or_stop(&mut shutdown_rx, self.interval).await {
                break;
            }
        }
    }
}

/// What one reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reaped {
    /// Jobs moved back to pending.
    pub jobs: u64,

    /// Worker rows deleted.
    pub workers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobRecord, JobState, WorkerId};
    use crate::impls::InMemoryJobStore;
    use crate::ports::{FixedClock, JobStore, WorkerRegistry};
    use chrono::{TimeZone, Utc};

    fn settings(stale_after_secs: u64) -> WorkerSettings {
        WorkerSettings {
            stale_after: Duration::from_secs(stale_after_secs),
            heartbeat_interval: Duration::from_secs(2),
            ..WorkerSettings::default()
        }
    }

    #[tokio::test]
    async fn reclaims_orphans_but_not_live_claims() {
        let t0 = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(FixedClock::new(t0));
        for id in ["orphan", "owned"] {
            store
                .insert(&JobRecord::new(JobId::from(id), "sleep 1", 3, t0))
                .await
                .unwrap();
        }
        let dead_worker = WorkerId::generate();
        let live_worker = WorkerId::generate();
        store.try_claim(&JobId::from("orphan"), &dead_worker, t0).await.unwrap();
        store.try_claim(&JobId::from("owned"), &live_worker, t0).await.unwrap();

        clock.advance(chrono::Duration::seconds(120));
        store.register_worker(&live_worker, 1, clock.now()).await.unwrap();

        let reaper = ReaperLoop::new(store.clone(), clock.clone(), &settings(60));
        assert_eq!(reaper.tick().await.unwrap(), Reaped { jobs: 1, workers: 0 });

        let orphan = store.get(&JobId::from("orphan")).await.unwrap().unwrap();
        assert_eq!(orphan.state, JobState::Pending);
        assert_eq!(orphan.attempts, 0);
        let owned = store.get(&JobId::from("owned")).await.unwrap().unwrap();
        assert_eq!(owned.state, JobState::Processing);
    }

    #[tokio::test]
    async fn zero_stale_after_disables_reclaim_but_still_prunes() {
        let t0 = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(FixedClock::new(t0));
        store
            .insert(&JobRecord::new(JobId::from("orphan"), "sleep 1", 3, t0))
            .await
            .unwrap();
        store
            .try_claim(&JobId::from("orphan"), &WorkerId::generate(), t0)
            .await
            .unwrap();
        let crashed = WorkerId::generate();
        store.register_worker(&crashed, 1, t0).await.unwrap();

        clock.advance(chrono::Duration::hours(1));
        let live = WorkerId::generate();
        store.register_worker(&live, 2, clock.now()).await.unwrap();

        let reaper = ReaperLoop::new(store.clone(), clock, &settings(0));
        assert!(reaper.is_disabled());
        assert_eq!(reaper.tick().await.unwrap(), Reaped { jobs: 0, workers: 1 });

        let orphan = store.get(&JobId::from("orphan")).await.unwrap().unwrap();
        assert_eq!(orphan.state, JobState::Processing);
        assert_eq!(store.count_live_workers(t0).await.unwrap(), 1);

        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        reaper.run(rx).await;
    }

    #[tokio::test]
    async fn huge_heartbeat_interval_does_not_overflow() {
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let settings = WorkerSettings {
            heartbeat_interval: Duration::from_millis(u64::MAX),
            ..WorkerSettings::default()
        };
        let reaper = ReaperLoop::new(store, clock, &settings);
        assert_eq!(reaper.tick().await.unwrap(), Reaped::default());
    }
}
