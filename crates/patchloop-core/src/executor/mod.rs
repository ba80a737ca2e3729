//! The execution boundary: runs argv-only `Command`s either directly on
//! the host (only when explicitly unsafe-enabled) or inside a Docker
//! container with resource caps, network policy, and cache-volume mounts.

pub mod docker;
pub mod error;
pub mod host;

use async_trait::async_trait;

use crate::command::{Command, CommandResult};
pub use docker::{CacheVolume, DockerExecutor};
pub use error::{ExecutorError, Result};
pub use host::HostExecutor;

/// Runs a `Command` and returns its outcome. A timeout surfaces as
/// `CommandResult { ok: false, timed_out: true }`, never as an error;
/// `ExecutorError` is reserved for conditions that prevented the command
/// from running at all (missing Docker, host exec disabled).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, command: &Command) -> Result<CommandResult>;
}

/// Env pins applied to every command, matching the reference buildpacks'
/// reproducibility requirements.
pub const ENV_PINS: &[(&str, &str)] = &[
    ("TZ", "UTC"),
    ("PYTHONHASHSEED", "0"),
    ("LC_ALL", "C.UTF-8"),
    ("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
];

/// Network policy for a phase of command execution. Install steps always
/// get network; test steps don't, except a narrow carve-out for `npx`
/// (§4.3, §9 open question on whether to generalise this).
pub fn test_command_network_allowed(argv: &[String]) -> bool {
    matches!(argv.first().map(String::as_str), Some("npx"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npx_carve_out_allows_network() {
        assert!(test_command_network_allowed(&["npx".into(), "jest".into()]));
    }

    #[test]
    fn test_pytest_denied_network() {
        assert!(!test_command_network_allowed(&["pytest".into(), "-q".into()]));
    }

    #[test]
    fn test_env_pins_include_tz_utc() {
        assert!(ENV_PINS.contains(&("TZ", "UTC")));
    }
}
