//! Error types for the sandbox module.

/// Errors produced by the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid repository url: {0}")]
    InvalidUrl(String),

    #[error("git operation failed: {0}")]
    Git(String),

    #[error("path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("domain error: {0}")]
    Domain(#[from] crate::domain::error::ControllerError),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
