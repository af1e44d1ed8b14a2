//! WorkerGroup - n 個の WorkerLoop と保守ループをまとめて起動・停止する
//!
//! - 各 worker を workers テーブルに登録し、control loop が heartbeat を送る
//! - ストア経由の停止要求（`worker stop`）も watch channel の停止シグナルに変換する
//! - 実行中のコマンドは止めない。ループは次の claim の前に抜ける

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::lifecycle::LifecycleEngine;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::worker_loop::{WorkerLoop, pause_or_stop};
use crate::config::WorkerSettings;
use crate::domain::{Result, WorkerId};
use crate::ports::{Clock, QueueStore};

/// Cloneable trigger for the group's stop signal (signal handlers, tests).
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop taking new jobs. In-flight commands run to completion. Idempotent.
    pub fn request_shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Worker group handle.
/// - `n` 個の WorkerLoop + control loop（heartbeat / 停止要求の監視）+ reaper
/// - `shutdown_handle()` を signal handler に渡す
/// - `join()` で全ループの終了を待ち、worker 登録を消す
pub struct WorkerGroup {
    store: Arc<dyn QueueStore>,
    workers: Vec<WorkerId>,
    shutdown: ShutdownHandle,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Register and spawn `n` workers sharing `engine`.
    pub async fn spawn(
        n: usize,
        engine: Arc<LifecycleEngine>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let store = Arc::clone(engine.store());
        let clock = Arc::clone(engine.clock());
        let shutdown = ShutdownHandle::new();
        let pid = std::process::id();

        let mut workers = Vec::with_capacity(n);
        for _ in 0..n {
            let worker = WorkerId::generate();
            store.register_worker(&worker, pid, clock.now()).await?;
            workers.push(worker);
        }

        let mut joins = Vec::with_capacity(n + 2);
        for worker in &workers {
            let worker_loop = WorkerLoop::new(*worker, Arc::clone(&engine), settings);
            let rx = shutdown.subscribe();
            joins.push(tokio::spawn(async move { worker_loop.run(rx).await }));
        }

        let control = ControlLoop {
            store: Arc::clone(&store),
            clock: Arc::clone(&clock),
            workers: workers.clone(),
            shutdown: shutdown.clone(),
            interval: settings.heartbeat_interval,
        };
        joins.push(tokio::spawn(async move { control.run().await }));

        let reaper = ReaperLoop::new(Arc::clone(&store), clock, &settings);
        let rx = shutdown.subscribe();
        joins.push(tokio::spawn(async move { reaper.run(rx).await }));

        tracing::info!(count = n, pid, "worker group started");
        Ok(Self {
            store,
            workers,
            shutdown,
            joins,
        })
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Request shutdown for all workers.
    /// Running commands are not cancelled; loops stop before the next claim.
    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// Wait for every loop to exit (after someone requests shutdown), then deregister.
    pub async fn join(self) {
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        for worker in &self.workers {
            if let Err(e) = self.store.deregister_worker(worker).await {
                tracing::error!(worker = %worker, error = %e, "failed to deregister worker");
            }
        }
        tracing::info!(count = self.workers.len(), "worker group stopped");
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}

/// Heartbeats every worker of the group and turns a stored stop request into the
/// local stop signal.
struct ControlLoop {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    workers: Vec<WorkerId>,
    shutdown: ShutdownHandle,
    interval: std::time::Duration,
}

impl ControlLoop {
    async fn run(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            if *rx.borrow() {
                break;
            }
            if self.beat().await {
                tracing::info!("stop requested through the store");
                self.shutdown.request_shutdown();
                break;
            }
            if pause_or_stop(&mut rx, self.interval).await {
                break;
            }
        }
    }

    /// Returns whether any worker has been asked to stop.
    async fn beat(&self) -> bool {
        let now = self.clock.now();
        let mut stop = false;
        for worker in &self.workers {
            match self.store.heartbeat(worker, now).await {
                Ok(flag) => stop |= flag,
                Err(e) => tracing::error!(worker = %worker, error = %e, "heartbeat failed"),
            }
        }
        stop
    }
}
