//! Context signature: the key ActionMemory uses to find priors from similar
//! past contexts.

use serde::{Deserialize, Serialize};

use crate::domain::digest::{digest_json, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSignature {
    pub failure_class: String,
    pub repo_type: String,
    pub language: String,
    pub env_fingerprint: String,
    pub attempt_bucket: u8,
    pub failing_test_file: Option<String>,
    pub sig_prefix: Option<String>,
    pub stalled: bool,
}

impl ContextSignature {
    pub fn new(
        failure_class: impl Into<String>,
        repo_type: impl Into<String>,
        language: impl Into<String>,
        env_fingerprint: impl Into<String>,
        attempt_bucket: u8,
    ) -> Self {
        Self {
            failure_class: failure_class.into(),
            repo_type: repo_type.into(),
            language: language.into(),
            env_fingerprint: env_fingerprint.into(),
            attempt_bucket: attempt_bucket.min(9),
            failing_test_file: None,
            sig_prefix: None,
            stalled: false,
        }
    }

    pub fn with_failing_test_file(mut self, file: impl Into<String>) -> Self {
        self.failing_test_file = Some(file.into());
        self
    }

    pub fn with_sig_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sig_prefix = Some(prefix.into());
        self
    }

    pub fn with_stalled(mut self, stalled: bool) -> Self {
        self.stalled = stalled;
        self
    }

    /// Canonical-JSON SHA-256 digest, used as the context key in the
    /// ActionMemory store.
    pub fn hash(&self) -> Result<String> {
        digest_json(&serde_json::to_value(self)?)
    }

    /// Similarity against another context in `[0.0, 1.0]`, per the weighted
    /// scheme ActionMemory uses: env (0.45) + attempt bucket (0.20) +
    /// failing test file (0.15) + signature prefix (0.10) + stalled (0.10).
    pub fn similarity(&self, other: &ContextSignature) -> f64 {
        let mut s = 0.0;
        if self.env_fingerprint == other.env_fingerprint {
            s += 0.45;
        }
        if self.attempt_bucket == other.attempt_bucket {
            s += 0.20;
        }
        if self.failing_test_file.is_some() && self.failing_test_file == other.failing_test_file {
            s += 0.15;
        }
        if self.sig_prefix.is_some() && self.sig_prefix == other.sig_prefix {
            s += 0.10;
        }
        if self.stalled == other.stalled {
            s += 0.10;
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stable() {
        let ctx = ContextSignature::new("import_error", "python", "python", "envhash1", 2);
        assert_eq!(ctx.hash().unwrap(), ctx.hash().unwrap());
    }

    #[test]
    fn test_hash_changes_on_mutation() {
        let a = ContextSignature::new("import_error", "python", "python", "envhash1", 2);
        let b = a.clone().with_stalled(true);
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let a = ContextSignature::new("import_error", "python", "python", "envhash1", 2)
            .with_failing_test_file("tests/test_x.py")
            .with_sig_prefix("abc123");
        assert_eq!(a.similarity(&a), 1.0);
    }

    #[test]
    fn test_similarity_only_env_match() {
        let a = ContextSignature::new("import_error", "python", "python", "envhash1", 2);
        let b = ContextSignature::new("type_error", "node", "node", "envhash1", 5);
        // env (0.45) matches; attempt bucket, optional fields, and stalled differ
        assert!((a.similarity(&b) - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_attempt_bucket_clamped() {
        let ctx = ContextSignature::new("x", "y", "z", "w", 200);
        assert_eq!(ctx.attempt_bucket, 9);
    }
}
