//! The `Command` value type the executor runs. Argv-only: no shell string
//! is ever stored or accepted, anywhere in the stack.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-command resource ceilings enforced by the Docker executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceCaps {
    pub cpu: f64,
    pub mem_mb: u64,
    pub pids: u32,
    pub read_only: bool,
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self {
            cpu: 2.0,
            mem_mb: 2048,
            pids: 256,
            read_only: false,
        }
    }
}

/// An argv-only command the executor may run. No subsystem in this crate
/// accepts or stores a shell string; `CommandPolicy` rejects anything that
/// looks like shell syntax before a `Command` is ever constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub timeout_sec: u64,
    pub network_allowed: bool,
    pub resource_caps: ResourceCaps,
}

impl Command {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>, timeout_sec: u64) -> Self {
        Self {
            argv,
            cwd: cwd.into(),
            timeout_sec,
            network_allowed: false,
            resource_caps: ResourceCaps::default(),
        }
    }

    pub fn with_network(mut self, allowed: bool) -> Self {
        self.network_allowed = allowed;
        self
    }

    pub fn with_resource_caps(mut self, caps: ResourceCaps) -> Self {
        self.resource_caps = caps;
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Outcome of running a `Command`, on host or in Docker. A timeout surfaces
/// here as `ok=false, timed_out=true`, never as a thrown exception.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            ok: exit_code == 0,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

/// A logged record of a command run, written verbatim to `command_log.json`.
/// Nothing else runs in the sandbox: every `Command` the core executes is
/// recorded here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandLogEntry {
    pub phase: String,
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandLogEntry {
    const TRUNCATE_BYTES: usize = 2000;

    pub fn new(phase: impl Into<String>, command: &Command, result: &CommandResult) -> Self {
        Self {
            phase: phase.into(),
            argv: command.argv.clone(),
            exit_code: result.exit_code,
            ok: result.ok,
            stdout: truncate(&result.stdout, Self::TRUNCATE_BYTES),
            stderr: truncate(&result.stderr, Self::TRUNCATE_BYTES),
            timed_out: result.timed_out,
        }
    }
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...<truncated>", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_program_is_argv0() {
        let cmd = Command::new(vec!["pytest".into(), "-q".into()], "/repo", 90);
        assert_eq!(cmd.program(), Some("pytest"));
    }

    #[test]
    fn test_resource_caps_default() {
        let caps = ResourceCaps::default();
        assert_eq!(caps.cpu, 2.0);
        assert!(!caps.read_only);
    }

    #[test]
    fn test_command_result_success_flag_derived_from_exit_code() {
        let ok = CommandResult::success(0, "", "");
        assert!(ok.ok);
        let failed = CommandResult::success(1, "", "");
        assert!(!failed.ok);
    }

    #[test]
    fn test_command_result_timeout_never_ok() {
        let t = CommandResult::timeout();
        assert!(!t.ok);
        assert!(t.timed_out);
    }

    #[test]
    fn test_command_log_entry_truncates_large_output() {
        let cmd = Command::new(vec!["echo".into()], "/repo", 5);
        let result = CommandResult::success(0, "a".repeat(5000), "");
        let entry = CommandLogEntry::new("BASELINE", &cmd, &result);
        assert!(entry.stdout.len() < 5000);
        assert!(entry.stdout.ends_with("...<truncated>"));
    }

    #[test]
    fn test_command_log_entry_preserves_small_output() {
        let cmd = Command::new(vec!["echo".into()], "/repo", 5);
        let result = CommandResult::success(0, "hello", "");
        let entry = CommandLogEntry::new("BASELINE", &cmd, &result);
        assert_eq!(entry.stdout, "hello");
    }
}
