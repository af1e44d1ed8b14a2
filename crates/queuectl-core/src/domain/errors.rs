use thiserror::Error;

use super::ids::JobId;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

/// Errors raised by the queue.
///
/// How each kind travels:
/// - `InvalidInput`, `DuplicateId`, `NotFound`: surfaced to the caller (CLI exits 1).
/// - `ClaimConflict`: internal control flow of the worker loop, never shown to users.
/// - `ExecutionFailure`: absorbed into a retry/dead transition.
/// - `Runner`: the command could not be run at all; the job stays in `processing`.
/// - `StoreFailure`: fatal for a CLI command, logged and retried by workers.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job '{0}' already exists")]
    DuplicateId(JobId),

    #[error("job '{0}' not found in dead letter queue")]
    NotFound(JobId),

    #[error("job '{0}' was claimed by another worker")]
    ClaimConflict(JobId),

    #[error("command failed: {0}")]
    ExecutionFailure(String),

    #[error("command runner fault: {0}")]
    Runner(String),

    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl QueueError {
    /// Errors the front end should report as a usage problem rather than a fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            QueueError::InvalidInput(_) | QueueError::DuplicateId(_) | QueueError::NotFound(_)
        )
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::StoreFailure(err.to_string())
    }
}
