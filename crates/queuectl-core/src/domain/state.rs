//! Job state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::QueueError;

/// Job state.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Pending (retry with backoff, until max_retries)
/// - Pending -> Processing -> Dead (retries exhausted)
/// - Dead -> Pending (manual DLQ retry only)
///
/// `Failed` is a logical label for "the last execution failed". The engine never
/// writes it; a failed execution goes straight to `Pending` or `Dead`. It stays in
/// the enum so that rows written by older versions still parse and show up in
/// `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed (possibly gated by `available_at`).
    Pending,

    /// Claimed by a worker and being executed.
    Processing,

    /// Finished successfully.
    Completed,

    /// Transient failure label (never persisted by this engine).
    Failed,

    /// Retries exhausted; parked in the dead letter queue.
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// No automatic transition leaves this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// Only pending jobs can be claimed.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobState::Pending)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidInput(format!(
                "unknown job state '{other}' (expected pending|processing|completed|failed|dead)"
            ))),
        }
    }
}
