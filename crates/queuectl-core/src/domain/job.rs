//! Job record: the persisted row plus its in-memory state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{QueueError, Result};
use super::ids::{JobId, WorkerId};
use super::state::JobState;

/// One row of the jobs table.
///
/// Design:
/// - This is the single source of truth for a job.
/// - Transition methods below mirror the store's write operations one to one, so the
///   in-memory store and the SQLite store agree on what each write touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub command: String,
    pub state: JobState,

    /// Executions that finished with a definitive result.
    pub attempts: u32,

    /// Retry limit resolved at enqueue time.
    pub max_retries: u32,

    /// Backoff gate. `None` means eligible immediately.
    pub available_at: Option<DateTime<Utc>>,

    /// Worker currently holding the `processing` claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    /// Failure summary of the most recent failed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, command: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            available_at: None,
            claimed_by: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending and past its backoff gate.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.state.is_claimable() && self.available_at.is_none_or(|at| at <= now)
    }

    /// Retry limit the engine should honour. Rows written by hand or by older
    /// versions may carry 0; every job gets at least one execution.
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn claim(&mut self, worker: &WorkerId, now: DateTime<Utc>) {
        self.state = JobState::Processing;
        self.claimed_by = Some(worker.to_string());
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, attempts: u32, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.attempts = attempts;
        self.available_at = None;
        self.claimed_by = None;
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn schedule_retry(
        &mut self,
        attempts: u32,
        now: DateTime<Utc>,
        available_at: DateTime<Utc>,
        error: Option<String>,
    ) {
        self.state = JobState::Pending;
        self.attempts = attempts;
        self.available_at = Some(available_at);
        self.claimed_by = None;
        self.last_error = error;
        self.updated_at = now;
    }

    pub fn mark_dead(&mut self, attempts: u32, now: DateTime<Utc>, error: Option<String>) {
        self.state = JobState::Dead;
        self.attempts = attempts;
        self.available_at = None;
        self.claimed_by = None;
        self.last_error = error;
        self.updated_at = now;
    }

    /// DLQ retry: back to a fresh pending job.
    pub fn revive(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Pending;
        self.attempts = 0;
        self.available_at = None;
        self.claimed_by = None;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Stale reclaim: an orphaned claim goes back to pending, attempts untouched.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Pending;
        self.claimed_by = None;
        self.updated_at = now;
    }
}

/// Enqueue payload as accepted by the front end.
///
/// ```json
/// {"id": "job1", "command": "echo hello", "max_retries": 5}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
}

impl EnqueueRequest {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Parse the JSON form used on the command line.
    pub fn from_json(raw: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(raw)
            .map_err(|e| QueueError::InvalidInput(format!("invalid job JSON: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(QueueError::InvalidInput("job \"id\" is required".to_string()));
        }
        if self.command.trim().is_empty() {
            return Err(QueueError::InvalidInput(
                "job \"command\" is required".to_string(),
            ));
        }
        if let Some(n) = self.max_retries
            && n < 1
        {
            return Err(QueueError::InvalidInput(format!(
                "max_retries must be a positive integer, got {n}"
            )));
        }
        Ok(())
    }
}
