//! In-memory store implementation.
//!
//! Same contract as the SQLite store, kept in a `tokio::sync::Mutex`. Every method
//! takes the lock once, so each write is atomic with respect to other workers in the
//! same process, which is all `try_claim` needs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord, JobState, QueueError, Result, WorkerId};
use crate::ports::{JobStore, WorkerRegistry};

#[derive(Debug, Clone)]
struct WorkerEntry {
    heartbeat_at: DateTime<Utc>,
    stop_requested: bool,
}

struct InMemoryState {
    /// All job records, keyed by id, with their insertion sequence for stable FIFO ties.
    jobs: HashMap<JobId, (u64, JobRecord)>,

    config: HashMap<String, String>,

    /// Keyed by the worker's display id, which is what `claimed_by` holds.
    workers: HashMap<String, WorkerEntry>,

    next_seq: u64,
}

impl InMemoryState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            config: HashMap::new(),
            workers: HashMap::new(),
            next_seq: 0,
        }
    }

    fn job_mut(&mut self, id: &JobId) -> Result<&mut JobRecord> {
        self.jobs
            .get_mut(id)
            .map(|(_, job)| job)
            .ok_or_else(|| QueueError::StoreFailure(format!("job '{id}' does not exist")))
    }

    /// Jobs matching `filter`, oldest first.
    fn sorted<F>(&self, filter: F) -> Vec<&JobRecord>
    where
        F: Fn(&JobRecord) -> bool,
    {
        let mut rows: Vec<&(u64, JobRecord)> =
            self.jobs.values().filter(|(_, job)| filter(job)).collect();
        rows.sort_by(|(a_seq, a), (b_seq, b)| {
            a.created_at.cmp(&b.created_at).then(a_seq.cmp(b_seq))
        });
        rows.into_iter().map(|(_, job)| job).collect()
    }

    fn is_live(&self, worker: &str, live_since: DateTime<Utc>) -> bool {
        self.workers
            .get(worker)
            .is_some_and(|w| w.heartbeat_at >= live_since)
    }
}

/// Store for tests and single-process experiments. Nothing survives the process.
pub struct InMemoryJobStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState::new()),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(QueueError::DuplicateId(job.id.clone()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(job.id.clone(), (seq, job.clone()));
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(id).map(|(_, job)| job.clone()))
    }

    async fn find_next_claimable(&self, now: DateTime<Utc>) -> Result<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted(|job| job.is_claimable_at(now))
            .first()
            .map(|job| (*job).clone()))
    }

    async fn try_claim(
        &self,
        id: &JobId,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(id) {
            Some((_, job)) if job.is_claimable_at(now) => {
                job.claim(worker, now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete(&self, id: &JobId, attempts: u32, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.job_mut(id)?.mark_completed(attempts, now);
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &JobId,
        attempts: u32,
        now: DateTime<Utc>,
        available_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .job_mut(id)?
            .schedule_retry(attempts, now, available_at, last_error.map(str::to_string));
        Ok(())
    }

    async fn kill(
        &self,
        id: &JobId,
        attempts: u32,
        now: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .job_mut(id)?
            .mark_dead(attempts, now, last_error.map(str::to_string));
        Ok(())
    }

    async fn revive_from_dead(&self, id: &JobId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(id) {
            Some((_, job)) if job.state == JobState::Dead => {
                job.revive(now);
                Ok(())
            }
            _ => Err(QueueError::NotFound(id.clone())),
        }
    }

    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let stale: Vec<JobId> = state
            .jobs
            .values()
            .map(|(_, job)| job)
            .filter(|job| matches!(job.state, JobState::Processing | JobState::Failed))
            .filter(|job| job.updated_at < stale_before)
            .filter(|job| match &job.claimed_by {
                Some(worker) => !state.is_live(worker, live_since),
                None => true,
            })
            .map(|job| job.id.clone())
            .collect();

        for id in &stale {
            state.job_mut(id)?.release(now);
        }
        Ok(stale.len() as u64)
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.config.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn count_by_state(&self, job_state: JobState) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|(_, job)| job.state == job_state)
            .count() as u64)
    }

    async fn list_by_state(&self, job_state: Option<JobState>) -> Result<Vec<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted(|job| job_state.is_none_or(|s| job.state == s))
            .into_iter()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryJobStore {
    async fn register_worker(&self, worker: &WorkerId, _pid: u32, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.workers.insert(
            worker.to_string(),
            WorkerEntry {
                heartbeat_at: now,
                stop_requested: false,
            },
        );
        Ok(())
    }

    async fn heartbeat(&self, worker: &WorkerId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.workers.get_mut(&worker.to_string()) {
            Some(entry) => {
                entry.heartbeat_at = now;
                Ok(entry.stop_requested)
            }
            None => Ok(false),
        }
    }

    async fn deregister_worker(&self, worker: &WorkerId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.workers.remove(&worker.to_string());
        Ok(())
    }

    async fn request_stop(&self, live_since: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut flagged = 0;
        for entry in state.workers.values_mut() {
            if entry.heartbeat_at >= live_since {
                entry.stop_requested = true;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn prune_workers(&self, silent_before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.workers.len();
        state.workers.retain(|_, entry| entry.heartbeat_at >= silent_before);
        Ok((before - state.workers.len()) as u64)
    }

    async fn count_live_workers(&self, since: DateTime<Utc>) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .workers
            .values()
            .filter(|w| w.heartbeat_at >= since)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    async fn store_with(jobs: &[(&str, i64)]) -> InMemoryJobStore {
        let store = InMemoryJobStore::new();
        for (id, offset) in jobs {
            let job = JobRecord::new(JobId::from(*id), "true", 3, t0() + Duration::seconds(*offset));
            store.insert(&job).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = store_with(&[("j1", 0)]).await;
        let dup = JobRecord::new(JobId::from("j1"), "echo again", 3, t0());
        let err = store.insert(&dup).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(id) if id.as_str() == "j1"));
    }

    #[tokio::test]
    async fn find_next_claimable_is_fifo_by_created_at() {
        let store = store_with(&[("late", 10), ("early", 0), ("middle", 5)]).await;
        let next = store
            .find_next_claimable(t0() + Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id.as_str(), "early");
    }

    #[tokio::test]
    async fn backoff_gate_hides_job_until_available_at() {
        let store = store_with(&[("j1", 0)]).await;
        let id = JobId::from("j1");
        let worker = WorkerId::generate();
        assert!(store.try_claim(&id, &worker, t0()).await.unwrap().is_some());
        store
            .reschedule(&id, 1, t0(), t0() + Duration::seconds(2), Some("exit code 1"))
            .await
            .unwrap();

        assert!(store.find_next_claimable(t0()).await.unwrap().is_none());
        assert!(
            store
                .find_next_claimable(t0() + Duration::milliseconds(1999))
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.try_claim(&id, &worker, t0()).await.unwrap().is_none());

        let due = store
            .find_next_claimable(t0() + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(due.map(|j| j.id), Some(id));
    }

    #[tokio::test]
    async fn second_claim_on_same_job_fails() {
        let store = store_with(&[("j1", 0)]).await;
        let id = JobId::from("j1");
        let winner = WorkerId::generate();
        let claimed = store.try_claim(&id, &winner, t0()).await.unwrap().unwrap();
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.claimed_by, Some(winner.to_string()));
        assert!(store.try_claim(&id, &WorkerId::generate(), t0()).await.unwrap().is_none());

        assert_eq!(store.count_by_state(JobState::Processing).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revive_requires_dead_job() {
        let store = store_with(&[("j1", 0)]).await;
        let id = JobId::from("j1");

        let err = store.revive_from_dead(&id, t0()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
        assert_eq!(store.get(&id).await.unwrap().unwrap().state, JobState::Pending);

        let err = store
            .revive_from_dead(&JobId::from("missing"), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn reclaim_skips_jobs_of_live_workers() {
        let store = store_with(&[("orphan", 0), ("owned", 1)]).await;
        let dead_worker = WorkerId::generate();
        let live_worker = WorkerId::generate();
        store.register_worker(&live_worker, 1, t0()).await.unwrap();

        store
            .try_claim(&JobId::from("orphan"), &dead_worker, t0())
            .await
            .unwrap();
        store
            .try_claim(&JobId::from("owned"), &live_worker, t0())
            .await
            .unwrap();

        let later = t0() + Duration::minutes(10);
        store.heartbeat(&live_worker, later).await.unwrap();
        let moved = store
            .reclaim_stale(later - Duration::minutes(5), later - Duration::seconds(6), later)
            .await
            .unwrap();

        assert_eq!(moved, 1);
        let orphan = store.get(&JobId::from("orphan")).await.unwrap().unwrap();
        assert_eq!(orphan.state, JobState::Pending);
        assert_eq!(orphan.claimed_by, None);
        let owned = store.get(&JobId::from("owned")).await.unwrap().unwrap();
        assert_eq!(owned.state, JobState::Processing);
    }

    #[tokio::test]
    async fn stop_request_reaches_registered_workers() {
        let store = InMemoryJobStore::new();
        let w = WorkerId::generate();
        store.register_worker(&w, 42, t0()).await.unwrap();

        assert!(!store.heartbeat(&w, t0()).await.unwrap());
        assert_eq!(store.request_stop(t0()).await.unwrap(), 1);
        assert!(store.heartbeat(&w, t0()).await.unwrap());

        assert_eq!(store.count_live_workers(t0()).await.unwrap(), 1);
        store.deregister_worker(&w).await.unwrap();
        assert_eq!(store.count_live_workers(t0()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn claim_returns_the_stored_row() {
        let store = store_with(&[("j1", 0)]).await;
        let id = JobId::from("j1");
        store.try_claim(&id, &WorkerId::generate(), t0()).await.unwrap();
        store.reschedule(&id, 2, t0(), t0(), Some("exit code 1")).await.unwrap();

        let claimed = store
            .try_claim(&id, &WorkerId::generate(), t0())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.attempts, 2);
        assert_eq!(claimed.last_error.as_deref(), Some("exit code 1"));
    }

    #[tokio::test]
    async fn stop_request_skips_silent_workers_and_prune_removes_them() {
        let store = InMemoryJobStore::new();
        let live = WorkerId::generate();
        let crashed = WorkerId::generate();
        let later = t0() + Duration::minutes(10);
        store.register_worker(&crashed, 1, t0()).await.unwrap();
        store.register_worker(&live, 2, later).await.unwrap();

        let live_since = later - Duration::seconds(6);
        assert_eq!(store.request_stop(live_since).await.unwrap(), 1);
        assert!(store.heartbeat(&live, later).await.unwrap());

        assert_eq!(store.prune_workers(live_since).await.unwrap(), 1);
        assert_eq!(store.count_live_workers(t0()).await.unwrap(), 1);
        // the crashed row is gone, so a heartbeat under its id finds nothing
        assert!(!store.heartbeat(&crashed, later).await.unwrap());
    }
}
