//! Policy (intent selection): scans failure output for known error-kind
//! families and derives a focused test command from the first failing
//! test's file path.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The repair intent chosen for this iteration, in priority order when
/// several error kinds are present in the same output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Import,
    Name,
    Syntax,
    Attribute,
    Type,
    Key,
    Index,
    Value,
    ZeroDivision,
    Assertion,
    Generic,
    GatherEvidence,
}

impl Intent {
    fn subgoal(&self) -> &'static str {
        match self {
            Intent::Import => "resolve the missing or misnamed import",
            Intent::Name => "fix the undefined name reference",
            Intent::Syntax => "fix the syntax error blocking parsing",
            Intent::Attribute => "fix the missing attribute access",
            Intent::Type => "fix the type mismatch",
            Intent::Key => "fix the missing dictionary key access",
            Intent::Index => "fix the out-of-range index access",
            Intent::Value => "fix the invalid value",
            Intent::ZeroDivision => "guard against the division by zero",
            Intent::Assertion => "fix the failing assertion",
            Intent::Generic => "diagnose and fix the failing test",
            Intent::GatherEvidence => "gather more evidence before proposing a patch",
        }
    }
}

/// One (pattern, intent) family, checked in priority order: import > name >
/// syntax > attribute > type > key > index > value > zero_division >
/// assertion > generic.
struct ErrorFamily {
    pattern: &'static str,
    intent: Intent,
}

const FAMILIES: &[ErrorFamily] = &[
    ErrorFamily { pattern: r"ModuleNotFoundError|ImportError", intent: Intent::Import },
    ErrorFamily { pattern: r"NameError", intent: Intent::Name },
    ErrorFamily { pattern: r"SyntaxError", intent: Intent::Syntax },
    ErrorFamily { pattern: r"AttributeError", intent: Intent::Attribute },
    ErrorFamily { pattern: r"TypeError", intent: Intent::Type },
    ErrorFamily { pattern: r"KeyError", intent: Intent::Key },
    ErrorFamily { pattern: r"IndexError", intent: Intent::Index },
    ErrorFamily { pattern: r"ValueError", intent: Intent::Value },
    ErrorFamily { pattern: r"ZeroDivisionError", intent: Intent::ZeroDivision },
    ErrorFamily { pattern: r"AssertionError", intent: Intent::Assertion },
];

fn family_regexes() -> &'static Vec<(Regex, Intent)> {
    static CACHE: OnceLock<Vec<(Regex, Intent)>> = OnceLock::new();
    CACHE.get_or_init(|| {
        FAMILIES
            .iter()
            .map(|f| (Regex::new(f.pattern).unwrap(), f.intent))
            .collect()
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChoice {
    pub intent: Intent,
    pub subgoal: String,
    pub focus_cmd: Option<String>,
    pub confidence: f64,
}

/// Scans combined stdout/stderr for the highest-priority matching error
/// family; falls back to `Generic` with low confidence when nothing
/// matches. `first_failing_test_file` derives `focus_cmd`, falling back to
/// `full_test_cmd` when no failing test path is known.
pub fn choose_policy(
    combined_output: &str,
    first_failing_test: Option<&str>,
    full_test_cmd: &str,
    force_gather_evidence: bool,
) -> PolicyChoice {
    if force_gather_evidence {
        return PolicyChoice {
            intent: Intent::GatherEvidence,
            subgoal: Intent::GatherEvidence.subgoal().to_string(),
            focus_cmd: derive_focus_cmd(first_failing_test, full_test_cmd),
            confidence: 0.3,
        };
    }

    for (re, intent) in family_regexes() {
        if re.is_match(combined_output) {
            return PolicyChoice {
                intent: *intent,
                subgoal: intent.subgoal().to_string(),
                focus_cmd: derive_focus_cmd(first_failing_test, full_test_cmd),
                confidence: 0.8,
            };
        }
    }

    PolicyChoice {
        intent: Intent::Generic,
        subgoal: Intent::Generic.subgoal().to_string(),
        focus_cmd: derive_focus_cmd(first_failing_test, full_test_cmd),
        confidence: 0.4,
    }
}

fn derive_focus_cmd(first_failing_test: Option<&str>, full_test_cmd: &str) -> Option<String> {
    match first_failing_test {
        Some(path) if !path.is_empty() => {
            if full_test_cmd.contains("pytest") {
                Some(format!("pytest -q {path}"))
            } else if full_test_cmd.contains("npm") || full_test_cmd.contains("jest") {
                Some(format!("npx jest {path}"))
            } else {
                Some(full_test_cmd.to_string())
            }
        }
        _ => Some(full_test_cmd.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_error_takes_priority_over_type_error() {
        let output = "TypeError: x\nModuleNotFoundError: No module named 'foo'\n";
        let choice = choose_policy(output, None, "pytest -q", false);
        assert_eq!(choice.intent, Intent::Import);
    }

    #[test]
    fn test_name_before_syntax_before_attribute() {
        let output = "AttributeError: x\nSyntaxError: y\nNameError: z\n";
        let choice = choose_policy(output, None, "pytest -q", false);
        assert_eq!(choice.intent, Intent::Name);
    }

    #[test]
    fn test_zero_division_before_assertion() {
        let output = "AssertionError\nZeroDivisionError: division by zero\n";
        let choice = choose_policy(output, None, "pytest -q", false);
        assert_eq!(choice.intent, Intent::ZeroDivision);
    }

    #[test]
    fn test_no_match_falls_back_to_generic() {
        let choice = choose_policy("some unrelated failure text", None, "pytest -q", false);
        assert_eq!(choice.intent, Intent::Generic);
    }

    #[test]
    fn test_force_gather_evidence_overrides_detection() {
        let output = "ModuleNotFoundError: No module named 'foo'\n";
        let choice = choose_policy(output, None, "pytest -q", true);
        assert_eq!(choice.intent, Intent::GatherEvidence);
    }

    #[test]
    fn test_focus_cmd_derived_from_failing_test_pytest() {
        let choice = choose_policy("TypeError", Some("tests/test_x.py"), "pytest -q", false);
        assert_eq!(choice.focus_cmd.as_deref(), Some("pytest -q tests/test_x.py"));
    }

    #[test]
    fn test_focus_cmd_falls_back_to_full_cmd() {
        let choice = choose_policy("TypeError", None, "pytest -q", false);
        assert_eq!(choice.focus_cmd.as_deref(), Some("pytest -q"));
    }
}
