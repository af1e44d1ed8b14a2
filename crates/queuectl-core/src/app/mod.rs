//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **LifecycleEngine**: claim → run → decide → persist
//! - **WorkerLoop**: 1 worker のポーリングループ
//! - **WorkerGroup**: n 個の WorkerLoop + heartbeat + reaper をまとめて起動・停止
//! - **ReaperLoop**: 持ち主のいない processing ジョブの回収
//! - **QueueService**: CLI 向けの操作（enqueue, list, status, dlq, config）

pub mod lifecycle;
pub mod reaper_loop;
pub mod service;
pub mod status;
pub mod worker_group;
pub mod worker_loop;

pub use self::lifecycle::LifecycleEngine;
pub use self::reaper_loop::{Reaped, ReaperLoop};
pub use self::service::QueueService;
pub use self::status::{StateCounts, StatusReport};
pub use self::worker_group::{ShutdownHandle, WorkerGroup};
pub use self::worker_loop::{Tick, WorkerLoop};
