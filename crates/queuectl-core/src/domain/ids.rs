//! Identifiers for jobs and workers.
//!
//! - `JobId` is chosen by the client at enqueue time and is the primary key of
//!   the jobs table. It is an opaque string; validation lives in
//!   [`EnqueueRequest`](super::job::EnqueueRequest).
//! - `WorkerId` is generated per worker loop. It is ULID based so that ids
//!   produced by different processes never collide and sort by start time.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Client-supplied job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one worker loop.
///
/// Display は `worker-<ULID>` 形式。DB の `claimed_by` / `workers.id` にもこの文字列を保存する。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId {
    ulid: Ulid,
}

impl WorkerId {
    const PREFIX: &'static str = "worker-";

    /// Generate a fresh worker id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self { ulid }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl From<Ulid> for WorkerId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.ulid)
    }
}
