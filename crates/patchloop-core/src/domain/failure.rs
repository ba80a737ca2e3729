//! Failure and verification result types produced by buildpack parsers and
//! consumed by the repair loop, stall detector, and policy selector.

use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_bytes;

/// Opaque-to-the-core description of a test failure, populated by a
/// buildpack's trace parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailureInfo {
    pub failing_tests: Vec<String>,
    pub likely_files: Vec<String>,
    pub signature: String,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl FailureInfo {
    /// Computes a stable short signature from the failing-test list and
    /// error kind. Two runs with the same signature are treated as the same
    /// failure mode.
    pub fn with_derived_signature(
        failing_tests: Vec<String>,
        likely_files: Vec<String>,
        error_type: Option<String>,
        error_message: Option<String>,
    ) -> Self {
        let mut material = failing_tests.clone();
        material.sort();
        if let Some(kind) = &error_type {
            material.push(kind.clone());
        }
        let signature = digest_bytes(material.join("|").as_bytes())[..16].to_string();
        Self {
            failing_tests,
            likely_files,
            signature,
            error_type,
            error_message,
        }
    }
}

/// Outcome of running the effective test command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifyResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub failing_tests: Vec<String>,
    pub sig: String,
}

impl VerifyResult {
    pub fn failing_count(&self) -> usize {
        self.failing_tests.len()
    }

    pub fn top_failing_test(&self) -> Option<&str> {
        self.failing_tests.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_stable_regardless_of_order() {
        let a = FailureInfo::with_derived_signature(
            vec!["test_b".into(), "test_a".into()],
            vec![],
            Some("TypeError".into()),
            None,
        );
        let b = FailureInfo::with_derived_signature(
            vec!["test_a".into(), "test_b".into()],
            vec![],
            Some("TypeError".into()),
            None,
        );
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn test_signature_changes_on_error_type() {
        let a = FailureInfo::with_derived_signature(vec!["test_a".into()], vec![], Some("TypeError".into()), None);
        let b = FailureInfo::with_derived_signature(vec!["test_a".into()], vec![], Some("KeyError".into()), None);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_verify_result_failing_count() {
        let v = VerifyResult {
            ok: false,
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            failing_tests: vec!["test_a".into(), "test_b".into()],
            sig: "abc".into(),
        };
        assert_eq!(v.failing_count(), 2);
        assert_eq!(v.top_failing_test(), Some("test_a"));
    }

    #[test]
    fn test_verify_result_no_failures() {
        let v = VerifyResult {
            ok: true,
            ..Default::default()
        };
        assert_eq!(v.top_failing_test(), None);
    }
}
