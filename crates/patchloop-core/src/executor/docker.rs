//! Docker-mode execution: the default executor. Wraps every command in a
//! disposable container with bind mounts, resource caps, network policy,
//! and (for Python images) a per-sandbox venv.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use super::error::{ExecutorError, Result};
use super::Executor;
use crate::command::{Command, CommandResult};

/// Named cache volumes mounted when caching is requested, shared
/// read-mostly across runs by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheVolume {
    Pip,
    Npm,
    Yarn,
    Pnpm,
}

impl CacheVolume {
    fn volume_name(&self) -> &'static str {
        match self {
            CacheVolume::Pip => "pip-cache",
            CacheVolume::Npm => "npm-cache",
            CacheVolume::Yarn => "yarn-cache",
            CacheVolume::Pnpm => "pnpm-cache",
        }
    }

    fn mount_target(&self) -> &'static str {
        match self {
            CacheVolume::Pip => "/root/.cache/pip",
            CacheVolume::Npm => "/root/.npm",
            CacheVolume::Yarn => "/usr/local/share/.cache/yarn",
            CacheVolume::Pnpm => "/root/.local/share/pnpm/store",
        }
    }
}

/// Static Docker executor configuration: image, read-only root, cache
/// volumes, and whether this image needs the Python venv wrapper.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    pub image: String,
    pub read_only: bool,
    pub cache_volumes: Vec<CacheVolume>,
    pub is_python_image: bool,
    pub venv_dir: Option<PathBuf>,
}

impl DockerExecutor {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            read_only: false,
            cache_volumes: Vec::new(),
            is_python_image: false,
            venv_dir: None,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_cache_volumes(mut self, volumes: Vec<CacheVolume>) -> Self {
        self.cache_volumes = volumes;
        self
    }

    pub fn as_python_image(mut self, venv_dir: impl Into<PathBuf>) -> Self {
        self.is_python_image = true;
        self.venv_dir = Some(venv_dir.into());
        self
    }

    /// Checks whether a `docker` binary is reachable at all.
    pub async fn check_available() -> bool {
        TokioCommand::new("docker")
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Builds the full `docker run` argv for `command`, without invoking it.
    /// Kept separate from `run` so the shape can be unit-tested without a
    /// real daemon.
    pub fn build_argv(&self, command: &Command) -> Vec<String> {
        let mut argv: Vec<String> = vec!["run".into(), "--rm".into()];

        argv.push(format!("--cpus={}", command.resource_caps.cpu));
        argv.push(format!("--memory={}m", command.resource_caps.mem_mb));
        argv.push(format!("--pids-limit={}", command.resource_caps.pids));

        if command.resource_caps.read_only || self.read_only {
            argv.push("--read-only".into());
            argv.push("--tmpfs=/tmp:rw,noexec,nosuid,size=512m".into());
        }

        if command.network_allowed {
            // default bridge network; no explicit flag needed
        } else {
            argv.push("--network=none".into());
        }

        for (k, v) in super::ENV_PINS {
            argv.push("-e".into());
            argv.push(format!("{k}={v}"));
        }

        argv.push("-v".into());
        argv.push(format!("{}:/repo", command.cwd.display()));
        argv.push("-w".into());
        argv.push("/repo".into());

        if self.is_python_image {
            if let Some(venv) = &self.venv_dir {
                argv.push("-v".into());
                argv.push(format!("{}:/opt/venv", venv.display()));
            }
        }

        for cache in &self.cache_volumes {
            argv.push("-v".into());
            argv.push(format!("{}:{}", cache.volume_name(), cache.mount_target()));
        }

        argv.push(self.image.clone());

        if self.is_python_image {
            argv.push("sh".into());
            argv.push("-c".into());
            argv.push(format!(
                "[ -x /opt/venv/bin/python ] || python -m venv /opt/venv; . /opt/venv/bin/activate; {}",
                shell_words::join(&command.argv)
            ));
        } else {
            argv.extend(command.argv.iter().cloned());
        }

        argv
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn run(&self, command: &Command) -> Result<CommandResult> {
        if !Self::check_available().await {
            return Err(ExecutorError::ToolMissing);
        }

        let argv = self.build_argv(command);
        debug!(image = %self.image, argv = ?argv, "docker-exec running command");

        let mut cmd = TokioCommand::new("docker");
        cmd.args(&argv);
        cmd.kill_on_drop(true);

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
            Err(_elapsed) => {
                warn!(timeout_sec = command.timeout_sec, "docker command timed out");
                Ok(CommandResult::timeout())
            }
        }
    }
}

/// Default per-sandbox venv directory, kept alongside the repo checkout.
pub fn default_venv_dir(sandbox_root: &Path) -> PathBuf {
    sandbox_root.join(".patchloop-venv")
}
