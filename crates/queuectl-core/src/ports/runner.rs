//! CommandRunner port - ジョブのコマンドを実行する

use async_trait::async_trait;

use crate::domain::{ExecutionOutcome, Result};

/// Runs one job command to completion.
///
/// - `Ok(outcome)`: the command ran; success or failure is in the outcome.
/// - `Err(QueueError::Runner)`: the command could not be started.
///
/// Implementations must not return before the command has finished.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<ExecutionOutcome>;
}
