//! Domain model (ids, job record, state machine, outcomes, decisions, errors).
//!
//! 外部 I/O に依存しない純粋なモデル。永続化・実行は ports/impls 側。

pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod state;
pub mod timestamp;

pub use self::decision::{Decider, Decision, DefaultDecider};
pub use self::errors::{QueueError, Result};
pub use self::ids::{JobId, WorkerId};
pub use self::job::{EnqueueRequest, JobRecord};
pub use self::outcome::{ExecutionOutcome, OutcomeKind};
pub use self::retry::RetryPolicy;
pub use self::state::JobState;
