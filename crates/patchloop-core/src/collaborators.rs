//! Trait seams for the external collaborators the core consumes but does
//! not implement: the LLM client, buildpack providers, trace parsers, and
//! the evidence-pack sink. Concrete implementations live in
//! `patchloop-runner` and `patchloop-cli`; the core only depends on these
//! interfaces so it can be tested against fakes.

use async_trait::async_trait;

use crate::command::Command;
use crate::domain::FailureInfo;
use crate::model::ModelResponse;

/// A single call to the configured LLM provider. Implementations resolve
/// their SDK and API key lazily, inside the call, never at construction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call_model(&self, prompt: &str, temperature: f64) -> Result<String, LlmError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model provider unreachable: {0}")]
    Unreachable(String),
    #[error("model SDK missing: {0}")]
    SdkMissing(String),
    #[error("model response malformed: {0}")]
    Malformed(String),
}

/// Maps `ModelResponse` to the three variants a caller needs to react to,
/// without importing `ModelResponse` itself in every collaborator.
pub type ParsedModelResponse = ModelResponse;

/// Per-language install/test plan and failure detection, as provided by a
/// buildpack. `detect` returns a confidence in `[0.0, 1.0]`; the caller
/// picks the highest-confidence buildpack above 0.5, falling back to a
/// default image otherwise.
pub trait Buildpack: Send + Sync {
    fn name(&self) -> &'static str;

    /// Confidence that this buildpack applies, given the repo's file tree.
    fn detect(&self, repo_files: &[String]) -> f64;

    fn image(&self) -> &str;

    /// Argv-only install commands, run with network enabled.
    fn install_steps(&self) -> Vec<Command>;

    /// The default full-verification command.
    fn test_plan(&self) -> Vec<String>;

    /// Derives a focused test invocation from a failing test's path.
    fn focus_plan(&self, failing_test_path: &str) -> Vec<String>;

    /// System packages this buildpack may request via the sysdeps
    /// installer, already filtered to the project's declared tier.
    fn sysdeps_whitelist(&self) -> &[&'static str];
}

/// Parses combined stdout/stderr from a test run into a `FailureInfo`.
pub trait TraceParser: Send + Sync {
    fn parse(&self, stdout: &str, stderr: &str) -> FailureInfo;
}

/// Receives the finished evidence-pack bundle and writes it to disk (or
/// wherever the implementation chooses). Export is best-effort: a failure
/// here must not prevent the outer result from returning.
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    async fn write(&self, run_dir: &std::path::Path, bundle: &serde_json::Value) -> Result<(), std::io::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBuildpack;

    impl Buildpack for FakeBuildpack {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn detect(&self, repo_files: &[String]) -> f64 {
            if repo_files.iter().any(|f| f == "pyproject.toml") {
                0.9
            } else {
                0.0
            }
        }
        fn image(&self) -> &str {
            "python:3.11-slim"
        }
        fn install_steps(&self) -> Vec<Command> {
            vec![Command::new(vec!["pip".into(), "install".into(), "-e".into(), ".".into()], "/repo", 300)]
        }
        fn test_plan(&self) -> Vec<String> {
            vec!["pytest".into(), "-q".into()]
        }
        fn focus_plan(&self, failing_test_path: &str) -> Vec<String> {
            vec!["pytest".into(), "-q".into(), failing_test_path.into()]
        }
        fn sysdeps_whitelist(&self) -> &[&'static str] {
            &["build-essential"]
        }
    }

    #[test]
    fn test_buildpack_detects_on_marker_file() {
        let bp = FakeBuildpack;
        assert!(bp.detect(&["pyproject.toml".to_string()]) > 0.5);
        assert_eq!(bp.detect(&["package.json".to_string()]), 0.0);
    }

    #[test]
    fn test_buildpack_focus_plan_includes_path() {
        let bp = FakeBuildpack;
        let plan = bp.focus_plan("tests/test_x.py");
        assert!(plan.contains(&"tests/test_x.py".to_string()));
    }

    struct CountingLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn call_model(&self, _prompt: &str, _temperature: f64) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"mode":"tool_request","requests":[],"why":"x"}"#.to_string())
        }
    }

    #[tokio::test]
    async fn test_llm_client_trait_object_is_callable() {
        let client: Box<dyn LlmClient> = Box::new(CountingLlm { calls: AtomicUsize::new(0) });
        let reply = client.call_model("prompt", 0.0).await.unwrap();
        assert!(reply.contains("tool_request"));
    }
}
