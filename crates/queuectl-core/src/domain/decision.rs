//! Decision model: what happens to a job after one execution.
//!
//! This module defines the Decision type (the next state) and the Decider trait
//! (how to get there from the job and the execution outcome). Deciding is pure;
//! writing the decision to the store is the lifecycle engine's job.

use chrono::{DateTime, Duration, Utc};

use super::job::JobRecord;
use super::outcome::ExecutionOutcome;
use super::retry::RetryPolicy;
use super::state::JobState;

/// The transition out of `processing`.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Command succeeded.
    Complete { attempts: u32 },

    /// Command failed and retries remain: back to pending behind a backoff gate.
    Retry {
        attempts: u32,
        delay: Duration,
        available_at: DateTime<Utc>,
        reason: String,
    },

    /// Command failed and the retry limit is reached.
    MarkDead { attempts: u32, reason: String },
}

impl Decision {
    /// Attempt count to persist with this decision.
    pub fn attempts(&self) -> u32 {
        match self {
            Decision::Complete { attempts }
            | Decision::Retry { attempts, .. }
            | Decision::MarkDead { attempts, .. } => *attempts,
        }
    }

    /// State the job ends up in.
    pub fn resulting_state(&self) -> JobState {
        match self {
            Decision::Complete { .. } => JobState::Completed,
            Decision::Retry { .. } => JobState::Pending,
            Decision::MarkDead { .. } => JobState::Dead,
        }
    }
}

/// Decides the next state for a job based on its record and the latest outcome.
///
/// Deciders are pure functions: same job, outcome and clock reading give the same
/// decision, and nothing is mutated.
pub trait Decider: Send + Sync {
    fn decide(&self, job: &JobRecord, outcome: &ExecutionOutcome, now: DateTime<Utc>) -> Decision;
}

/// Attempt-count retry logic with exponential backoff:
/// - success -> Complete
/// - failure with attempts + 1 < max_retries -> Retry after base ^ (attempts + 1) seconds
/// - failure with attempts + 1 >= max_retries -> MarkDead
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, job: &JobRecord, outcome: &ExecutionOutcome, now: DateTime<Utc>) -> Decision {
        let attempts = job.attempts.saturating_add(1);
        if outcome.is_success() {
            return Decision::Complete { attempts };
        }

        let max_retries = job.effective_max_retries();
        if attempts >= max_retries {
            Decision::MarkDead {
                attempts,
                reason: format!(
                    "retries exhausted ({attempts}/{max_retries}): {}",
                    outcome.failure_summary()
                ),
            }
        } else {
            let delay = self.retry_policy.next_delay(attempts);
            Decision::Retry {
                attempts,
                delay,
                available_at: now + delay,
                reason: outcome.failure_summary(),
            }
        }
    }
}
