//! Outcome of one command execution.
//!
//! A runner reports either `Ok(ExecutionOutcome)` (the command ran and we know how it
//! ended) or `Err(QueueError::Runner)` (we could not run it at all). Only the first
//! kind counts as an attempt.

use serde::{Deserialize, Serialize};

use super::errors::QueueError;

/// Longest stderr excerpt kept in `last_error`.
const ERROR_EXCERPT_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// What the command did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub kind: OutcomeKind,

    /// `None` when the process was killed by a signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    /// Short description of a failure, suitable for `last_error`.
    pub fn failure_summary(&self) -> String {
        let code = match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            return code;
        }
        let excerpt: String = stderr.chars().take(ERROR_EXCERPT_CHARS).collect();
        format!("{code}: {excerpt}")
    }

    /// `Err(ExecutionFailure)` for a failed run, so callers can log it like any error.
    pub fn into_result(self) -> Result<Self, QueueError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(QueueError::ExecutionFailure(self.failure_summary()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&OutcomeKind::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&OutcomeKind::Failure).unwrap(),
            "\"FAILURE\""
        );
    }

    #[test]
    fn failure_summary_includes_exit_code_and_stderr() {
        let o = ExecutionOutcome::failure(Some(2)).with_stderr("ls: cannot access 'x'\n");
        assert_eq!(o.failure_summary(), "exit code 2: ls: cannot access 'x'");
    }

    #[test]
    fn failure_summary_without_exit_code() {
        let o = ExecutionOutcome::failure(None);
        assert_eq!(o.failure_summary(), "terminated by signal");
    }

    #[test]
    fn failure_summary_truncates_long_stderr() {
        let o = ExecutionOutcome::failure(Some(1)).with_stderr("e".repeat(2000));
        assert!(o.failure_summary().len() < 600);
    }

    #[test]
    fn into_result_maps_failure_to_execution_failure() {
        assert!(ExecutionOutcome::success().into_result().is_ok());
        let err = ExecutionOutcome::failure(Some(1)).into_result().unwrap_err();
        assert!(matches!(err, QueueError::ExecutionFailure(m) if m == "exit code 1"));
    }
}
