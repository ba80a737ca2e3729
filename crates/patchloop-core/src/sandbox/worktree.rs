//! RAII git worktree: created on construction, removed on drop. A worktree
//! is exclusively owned by its evaluator task; removal must be safe to call
//! twice (the controller may also drop it explicitly after an evaluation).

use std::path::{Path, PathBuf};
use std::process::Command as SyncCommand;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{Result, SandboxError};

/// A worktree checked out from `repo_dir`'s `HEAD`, deleted when dropped.
pub struct WorktreeHandle {
    repo_dir: PathBuf,
    dir: TempDir,
    dropped: std::sync::atomic::AtomicBool,
}

impl WorktreeHandle {
    pub async fn create(repo_dir: &Path, suffix: &str) -> Result<Self> {
        let dir = TempDir::with_prefix(format!("patchloop_wt_{suffix}_"))
            .map_err(SandboxError::Io)?;

        let output = Command::new("git")
            .arg("-C")
            .arg(repo_dir)
            .args(["worktree", "add", "--detach"])
            .arg(dir.path())
            .arg("HEAD")
            .output()
            .await
            .map_err(SandboxError::Io)?;

        if !output.status.success() {
            return Err(SandboxError::Git(format!(
                "git worktree add failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        debug!(path = %dir.path().display(), "created worktree");

        Ok(Self {
            repo_dir: repo_dir.to_path_buf(),
            dir,
            dropped: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Explicit async removal, for callers that want to observe errors
    /// instead of relying on the best-effort synchronous `Drop`.
    pub async fn remove(self) -> Result<()> {
        self.dropped.store(true, std::sync::atomic::Ordering::SeqCst);
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(["worktree", "remove", "--force"])
            .arg(self.dir.path())
            .output()
            .await
            .map_err(SandboxError::Io)?;
        if !output.status.success() {
            return Err(SandboxError::Git(format!(
                "git worktree remove failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

impl Drop for WorktreeHandle {
    fn drop(&mut self) {
        if self.dropped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let status = SyncCommand::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(["worktree", "remove", "--force"])
            .arg(self.dir.path())
            .status();

        match status {
            Ok(s) if s.success() => debug!(path = %self.dir.path().display(), "dropped worktree"),
            Ok(s) => warn!(path = %self.dir.path().display(), code = ?s.code(), "worktree removal exited non-zero"),
            Err(e) => warn!(path = %self.dir.path().display(), error = %e, "couldn't clean up worktree"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as SyncCommand;

    fn init_repo() -> TempDir {
        let repo = TempDir::new().unwrap();
        SyncCommand::new("git").arg("init").current_dir(repo.path()).output().unwrap();
        SyncCommand::new("git")
            .args(["commit", "--allow-empty", "-m", "init"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_create_and_drop_worktree() {
        let repo = init_repo();
        let path;
        {
            let handle = WorktreeHandle::create(repo.path(), "abc1234567").await.unwrap();
            path = handle.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_explicit_remove() {
        let repo = init_repo();
        let handle = WorktreeHandle::create(repo.path(), "deadbeef01").await.unwrap();
        let path = handle.path().to_path_buf();
        handle.remove().await.unwrap();
        assert!(!path.exists());
    }
}
