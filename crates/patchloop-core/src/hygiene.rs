//! `PatchHygiene`: a structural gate on unified diffs, applied before any
//! candidate reaches `PatchEvaluator`. Rejection is recorded in
//! ActionMemory with outcome `blocked` and score 0 by the caller.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Diff;

/// Which hygiene profile applies: tighter for bug-repair, looser (larger
/// diffs, test edits allowed) for feature work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HygieneProfile {
    Repair,
    Feature,
}

/// Language adjustments to `max_lines` in feature mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileLanguage {
    Java,
    Node,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct HygieneLimits {
    pub max_lines: usize,
    pub max_files: usize,
    pub allow_test_modification: bool,
    pub allow_test_deletion: bool,
    pub allow_lockfile_changes: bool,
}

impl HygieneLimits {
    pub fn for_profile(profile: HygieneProfile, language: ProfileLanguage) -> Self {
        match profile {
            HygieneProfile::Repair => Self {
                max_lines: 200,
                max_files: 5,
                allow_test_modification: false,
                allow_test_deletion: false,
                allow_lockfile_changes: false,
            },
            HygieneProfile::Feature => {
                let mut max_lines = 500;
                max_lines += match language {
                    ProfileLanguage::Java => 200,
                    ProfileLanguage::Node => 100,
                    ProfileLanguage::Other => 0,
                };
                Self {
                    max_lines,
                    max_files: 15,
                    allow_test_modification: true,
                    allow_test_deletion: false,
                    allow_lockfile_changes: false,
                }
            }
        }
    }
}

const FORBIDDEN_PATH_PREFIXES: &[&str] = &[
    ".git/",
    "node_modules/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "dist/",
    "build/",
    "target/",
    "vendor/",
    "third_party/",
];

fn forbidden_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            (^|/)\.env(\..*)?$
            | \.key$
            | \.pem$
            | (^|/)id_rsa$
            | (^|/)id_ed25519$
            | (^|/)secrets\.ya?ml$
            | \.lock$
            ",
        )
        .unwrap()
    })
}

fn test_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            (^|/)test_[^/]*\.(py)$
            | [^/]*_test\.(py|js|ts)$
            | [^/]*\.test\.(py|js|ts)$
            | (^|/)tests?/
            ",
        )
        .unwrap()
    })
}

fn skip_directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@pytest\.mark\.(skip|xfail)|@unittest\.skip").unwrap()
    })
}

fn debug_sentinel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"pdb\.set_trace|breakpoint\(|print\(\s*"(DEBUG|debug)|pprint\("#).unwrap())
}

fn deleted_test_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"deleted file mode.*\n(\+\+\+ /dev/null\n)?--- a/(\S+)").unwrap())
}

pub fn is_test_file(path: &str) -> bool {
    test_file_re().is_match(path)
}

/// Result of a hygiene check.
#[derive(Debug, Clone, PartialEq)]
pub struct HygieneResult {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

impl HygieneResult {
    fn ok() -> Self {
        Self {
            is_valid: true,
            violations: Vec::new(),
        }
    }
}

/// The always-strict structural checks, regardless of profile, plus the
/// profile-specific size/path limits.
pub fn check(diff: &Diff, limits: &HygieneLimits) -> HygieneResult {
    let mut violations = Vec::new();

    if diff.total_lines_changed() > limits.max_lines {
        violations.push(format!(
            "diff changes {} lines, exceeding the {}-line limit",
            diff.total_lines_changed(),
            limits.max_lines
        ));
    }
    if diff.files_changed.len() > limits.max_files {
        violations.push(format!(
            "diff touches {} files, exceeding the {}-file limit",
            diff.files_changed.len(),
            limits.max_files
        ));
    }

    for path in &diff.files_changed {
        if FORBIDDEN_PATH_PREFIXES.iter().any(|p| path.starts_with(p)) {
            violations.push(format!("path '{path}' is under a forbidden prefix"));
        }
        if forbidden_filename_re().is_match(path) {
            if path.ends_with(".lock") && limits.allow_lockfile_changes {
                continue;
            }
            violations.push(format!("path '{path}' matches a forbidden filename pattern"));
        }
        if is_test_file(path) && !limits.allow_test_modification {
            violations.push(format!("diff modifies test file '{path}', which this profile forbids"));
        }
    }

    if skip_directive_re().is_match(&diff.text) {
        violations.push("diff introduces a test-skip directive in a test file".to_string());
    }

    if debug_sentinel_re().is_match(&diff.text) {
        violations.push("diff introduces a debug sentinel (pdb/breakpoint/debug-print)".to_string());
    }

    if let Some(caps) = deleted_test_file_re().captures(&diff.text) {
        let path = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if is_test_file(path) && !limits.allow_test_deletion {
            violations.push(format!("Cannot delete test file '{path}'; this profile forbids test deletion"));
        }
    }

    if violations.is_empty() {
        HygieneResult::ok()
    } else {
        HygieneResult {
            is_valid: false,
            violations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HygieneViolationReport {
    pub diff_hash: String,
    pub violations: Vec<String>,
}
