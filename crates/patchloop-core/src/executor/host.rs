//! Host-mode execution: runs argv directly with a timeout. Only reachable
//! when the config explicitly sets `unsafe_host_exec`; the constructor
//! enforces that so a misconfigured caller can't silently fall back to it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use super::error::{ExecutorError, Result};
use super::Executor;
use crate::command::{Command, CommandResult};

pub struct HostExecutor {
    _private: (),
}

impl HostExecutor {
    /// Constructs a host executor. `unsafe_host_exec` must be `true`;
    /// otherwise every `run` call would be a silent policy violation, so
    /// refuse to construct at all.
    pub fn new(unsafe_host_exec: bool) -> Result<Self> {
        if !unsafe_host_exec {
            return Err(ExecutorError::HostExecDisabled);
        }
        warn!("host executor enabled: commands run directly on the controller host");
        Ok(Self { _private: () })
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn run(&self, command: &Command) -> Result<CommandResult> {
        let Some(program) = command.program() else {
            return Err(ExecutorError::ExecError("empty argv".to_string()));
        };

        let mut cmd = TokioCommand::new(program);
        cmd.args(&command.argv[1..]);
        cmd.current_dir(&command.cwd);
        cmd.kill_on_drop(true);
        for (k, v) in super::ENV_PINS {
            cmd.env(k, v);
        }

        debug!(argv = ?command.argv, "host-exec running command");

        let fut = cmd.output();
        match tokio::time::timeout(Duration::from_secs(command.timeout_sec), fut).await {
            Ok(Ok(output)) => Ok(CommandResult {
                ok: output.status.success(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(ExecutorError::Io(e)),
            Err(_elapsed) => Ok(CommandResult::timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_unsafe_flag_unset() {
        assert!(HostExecutor::new(false).is_err());
    }

    #[tokio::test]
    async fn test_runs_true_command() {
        let exec = HostExecutor::new(true).unwrap();
        let cmd = Command::new(vec!["true".into()], std::env::temp_dir(), 5);
        let result = exec.run(&cmd).await.unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn test_captures_nonzero_exit() {
        let exec = HostExecutor::new(true).unwrap();
        let cmd = Command::new(vec!["false".into()], std::env::temp_dir(), 5);
        let result = exec.run(&cmd).await.unwrap();
        assert!(!result.ok);
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_result_not_error() {
        let exec = HostExecutor::new(true).unwrap();
        let cmd = Command::new(vec!["sleep".into(), "5".into()], std::env::temp_dir(), 1);
        let result = exec.run(&cmd).await.unwrap();
        assert!(result.timed_out);
        assert!(!result.ok);
    }
}
