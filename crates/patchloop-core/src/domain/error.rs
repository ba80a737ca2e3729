//! Error taxonomy for the repair controller.
//!
//! Kinds mirror the recoverable/non-recoverable split the loop uses to decide
//! whether a failure stays inside REPAIR_LOOP or forces a transition to
//! BAILOUT: see [`ControllerError::is_recoverable`].

use uuid::Uuid;

/// Errors raised anywhere in the controller, sandbox, or evaluation stack.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("ingest failed: {0}")]
    Ingest(String),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("policy blocked action: {0}")]
    PolicyBlock(String),

    #[error("command execution failed: {0}")]
    Exec(String),

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("stall bailout: {0}")]
    StallBailout(String),

    #[error("budget bailout: {0}")]
    BudgetBailout(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ControllerError {
    /// Recoverable errors stay inside REPAIR_LOOP and feed the next decision.
    /// Non-recoverable errors transition the loop to BAILOUT.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ControllerError::PolicyBlock(_) | ControllerError::Exec(_) | ControllerError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_block_is_recoverable() {
        let err = ControllerError::PolicyBlock("shell idiom detected".to_string());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_setup_is_not_recoverable() {
        let err = ControllerError::Setup("pip install failed".to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_timeout_display() {
        let err = ControllerError::Timeout(90);
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn test_run_not_found_display() {
        let id = Uuid::new_v4();
        let err = ControllerError::RunNotFound(id);
        assert!(err.to_string().contains("run not found"));
    }
}
