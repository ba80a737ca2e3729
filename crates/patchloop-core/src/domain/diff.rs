//! Unified diff representation and derived metrics.

use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_bytes;

/// A unified-diff text blob plus metrics derived from it. The hash is the
/// identity used to avoid retrying a diff already attempted this run, and
/// to name the worktree it is evaluated in (`suffix = hash[..10]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diff {
    pub text: String,
    pub hash: String,
    pub files_changed: Vec<String>,
    pub lines_added: usize,
    pub lines_removed: usize,
}

impl Diff {
    pub fn parse(text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = digest_bytes(text.as_bytes());
        let mut files_changed = Vec::new();
        let mut lines_added = 0usize;
        let mut lines_removed = 0usize;

        for line in text.lines() {
            if let Some(path) = line.strip_prefix("+++ b/") {
                if !files_changed.contains(&path.to_string()) {
                    files_changed.push(path.to_string());
                }
                continue;
            }
            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            }
            if let Some(rest) = line.strip_prefix('+') {
                if !rest.starts_with('+') {
                    lines_added += 1;
                }
            } else if let Some(rest) = line.strip_prefix('-') {
                if !rest.starts_with('-') {
                    lines_removed += 1;
                }
            }
        }

        Self {
            text,
            hash,
            files_changed,
            lines_added,
            lines_removed,
        }
    }

    pub fn worktree_suffix(&self) -> &str {
        &self.hash[..10]
    }

    pub fn total_lines_changed(&self) -> usize {
        self.lines_added + self.lines_removed
    }

    /// True if the unified-diff text looks syntactically plausible: a
    /// `diff --git a/` header and at least one hunk header (`@@`).
    pub fn looks_like_unified_diff(text: &str) -> bool {
        text.contains("diff --git a/") && text.contains("@@")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "diff --git a/src/app.py b/src/app.py\n\
--- a/src/app.py\n\
+++ b/src/app.py\n\
@@ -1,3 +1,3 @@\n\
-import foo\n\
+import foobar\n\
 rest\n";

    #[test]
    fn test_parse_files_changed() {
        let d = Diff::parse(SAMPLE);
        assert_eq!(d.files_changed, vec!["src/app.py".to_string()]);
    }

    #[test]
    fn test_parse_lines_added_removed() {
        let d = Diff::parse(SAMPLE);
        assert_eq!(d.lines_added, 1);
        assert_eq!(d.lines_removed, 1);
    }

    #[test]
    fn test_hash_stable() {
        let a = Diff::parse(SAMPLE);
        let b = Diff::parse(SAMPLE);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_worktree_suffix_len() {
        let d = Diff::parse(SAMPLE);
        assert_eq!(d.worktree_suffix().len(), 10);
    }

    #[test]
    fn test_looks_like_unified_diff() {
        assert!(Diff::looks_like_unified_diff(SAMPLE));
        assert!(!Diff::looks_like_unified_diff("not a diff at all"));
    }

    #[test]
    fn test_multiple_files_changed() {
        let text = "diff --git a/a.py b/a.py\n+++ b/a.py\n@@ -1 +1 @@\n-x\n+y\n\
diff --git a/b.py b/b.py\n+++ b/b.py\n@@ -1 +1 @@\n-x\n+y\n";
        let d = Diff::parse(text);
        assert_eq!(d.files_changed, vec!["a.py".to_string(), "b.py".to_string()]);
    }
}
