//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 実装は `impls` にあります（SQLite / in-memory / shell）。

pub mod clock;
pub mod job_store;
pub mod runner;
pub mod worker_registry;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::job_store::JobStore;
pub use self::runner::CommandRunner;
pub use self::worker_registry::WorkerRegistry;

/// A store that also tracks workers. Both bundled stores implement it.
pub trait QueueStore: JobStore + WorkerRegistry {}

impl<T: JobStore + WorkerRegistry> QueueStore for T {}
