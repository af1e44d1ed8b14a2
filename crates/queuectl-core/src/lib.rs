//! queuectl-core
//!
//! SQLite-backed background job queue: persistent jobs, concurrent workers,
//! exponential-backoff retries and a dead letter queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, job, outcome, retry, decision, errors, timestamp）
//! - **ports**: 抽象化レイヤー（JobStore, WorkerRegistry, CommandRunner, Clock）
//! - **config**: config テーブルの値の解決
//! - **app**: アプリケーションロジック（lifecycle, worker_loop, worker_group, reaper_loop, service）
//! - **impls**: 実装（SqliteJobStore, InMemoryJobStore, ShellRunner）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
