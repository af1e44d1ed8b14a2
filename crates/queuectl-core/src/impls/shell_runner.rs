//! Runs job commands through the system shell.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::{ExecutionOutcome, QueueError, Result};
use crate::ports::CommandRunner;

const DEFAULT_SHELL: &str = "sh";

/// Executes each command with `<shell> -c <command>` and waits for it to exit.
///
/// stdout and stderr are captured; the exit status alone decides success. On unix the
/// child leads its own process group, so signals sent to the worker's group (terminal
/// Ctrl-C) leave an in-flight command running until it exits.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn outcome_from(output: std::process::Output) -> ExecutionOutcome {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let outcome = if output.status.success() {
            ExecutionOutcome::success()
        } else {
            ExecutionOutcome::failure(output.status.code())
        };
        outcome.with_stdout(stdout).with_stderr(stderr)
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<ExecutionOutcome> {
        tracing::debug!(shell = %self.shell, command, "spawning command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group: a terminal Ctrl-C reaches the worker, not the running job.
        #[cfg(unix)]
        cmd.process_group(0);

        let output = cmd
            .output()
            .await
            .map_err(|e| QueueError::Runner(format!("failed to spawn {}: {e}", self.shell)))?;

        let outcome = Self::outcome_from(output);
        if !outcome.stdout.is_empty() {
            tracing::info!(command, stdout = %outcome.stdout.trim_end(), "command output");
        }
        if !outcome.stderr.is_empty() {
            tracing::info!(command, stderr = %outcome.stderr.trim_end(), "command stderr");
        }
        Ok(outcome)
    }
}
