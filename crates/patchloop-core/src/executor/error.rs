//! Error types for the executor module.

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("docker is not available on this host")]
    ToolMissing,

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("command execution failed: {0}")]
    ExecError(String),

    #[error("host execution is disabled; pass --unsafe-host-exec to enable it")]
    HostExecDisabled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
