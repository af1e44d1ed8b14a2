//! Impls - ポートの実装
//!
//! - SqliteJobStore: 本番用。複数プロセスで 1 つの DB ファイルを共有する
//! - InMemoryJobStore: テスト・開発用
//! - ShellRunner: `sh -c` でコマンドを実行する

pub mod memory_store;
pub mod shell_runner;
pub mod sqlite_store;

pub use self::memory_store::InMemoryJobStore;
pub use self::shell_runner::ShellRunner;
pub use self::sqlite_store::SqliteJobStore;
