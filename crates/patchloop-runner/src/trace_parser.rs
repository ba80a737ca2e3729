//! Concrete `TraceParser` providers: pytest and Jest output parsing into a
//! `FailureInfo`. Both work off combined stdout/stderr text only — neither
//! shells out nor touches the sandbox.

use std::sync::OnceLock;

use regex::Regex;

use patchloop_core::collaborators::TraceParser;
use patchloop_core::domain::FailureInfo;

fn pytest_failed_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:FAILED|ERROR)\s+(\S+?)(?:::\S+)?(?:\s+-\s+(\S+):\s*(.*))?$").unwrap())
}

fn pytest_traceback_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^E\s+([A-Za-z_][A-Za-z0-9_.]*(?:Error|Exception|Warning))\b:?\s*(.*)$").unwrap())
}

fn pytest_likely_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^(\S+\.py):\d+:"#).unwrap())
}

/// Parses `pytest -q` combined output: `FAILED <path>::<test>`/`ERROR
/// <path>::<test>` summary lines for the failing-test list, `E   <Error>:
/// <message>` lines from the first traceback for the error kind, and
/// `<path>.py:<line>:` locations for likely-culprit files.
pub struct PytestTraceParser;

impl TraceParser for PytestTraceParser {
    fn parse(&self, stdout: &str, stderr: &str) -> FailureInfo {
        let combined = format!("{stdout}\n{stderr}");

        let mut failing_tests = Vec::new();
        for caps in pytest_failed_line_re().captures_iter(&combined) {
            if let Some(m) = caps.get(1) {
                let path = m.as_str().to_string();
                if !failing_tests.contains(&path) {
                    failing_tests.push(path);
                }
            }
        }

        let mut error_type = None;
        let mut error_message = None;
        if let Some(caps) = pytest_traceback_error_re().captures(&combined) {
            error_type = caps.get(1).map(|m| m.as_str().to_string());
            error_message = caps.get(2).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty());
        }

        let mut likely_files: Vec<String> = pytest_likely_file_re()
            .captures_iter(&combined)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        likely_files.dedup();

        FailureInfo::with_derived_signature(failing_tests, likely_files, error_type, error_message)
    }
}

fn jest_fail_suite_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^FAIL\s+(\S+)").unwrap())
}

fn jest_failing_test_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*[✕✗×]\s+(.+?)(?:\s+\(\d+\s*m?s\))?$").unwrap())
}

fn jest_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*([A-Za-z_][A-Za-z0-9_.]*(?:Error|Exception)):\s*(.*)$").unwrap())
}

/// Parses `jest` (or `npm test` wrapping it) combined output: `FAIL
/// <path>` lines for likely-culprit files, `✕ <test name>` lines for the
/// failing-test list, and the first `<ErrorType>: <message>` line for the
/// error kind.
pub struct JestTraceParser;

impl TraceParser for JestTraceParser {
    fn parse(&self, stdout: &str, stderr: &str) -> FailureInfo {
        let combined = format!("{stdout}\n{stderr}");

        let likely_files: Vec<String> = jest_fail_suite_re()
            .captures_iter(&combined)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        let mut failing_tests: Vec<String> = jest_failing_test_re()
            .captures_iter(&combined)
            .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
            .collect();
        failing_tests.dedup();

        let mut error_type = None;
        let mut error_message = None;
        if let Some(caps) = jest_error_re().captures(&combined) {
            error_type = caps.get(1).map(|m| m.as_str().to_string());
            error_message = caps.get(2).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty());
        }

        FailureInfo::with_derived_signature(failing_tests, likely_files, error_type, error_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_OUTPUT: &str = "\
============================= test session starts ==============================
collected 3 items

tests/test_app.py::test_one PASSED
tests/test_app.py::test_two FAILED

=================================== FAILURES ====================================
___________________________________ test_two ____________________________________

    def test_two():
>       import foo
E       ModuleNotFoundError: No module named 'foo'

src/app.py:3: ModuleNotFoundError
tests/test_app.py:12: in test_two
=========================== short test summary info ============================
FAILED tests/test_app.py::test_two - ModuleNotFoundError: No module named 'foo'
";

    #[test]
    fn test_pytest_extracts_failing_test_path() {
        let info = PytestTraceParser.parse(PYTEST_OUTPUT, "");
        assert_eq!(info.failing_tests, vec!["tests/test_app.py".to_string()]);
    }

    #[test]
    fn test_pytest_extracts_error_type_and_message() {
        let info = PytestTraceParser.parse(PYTEST_OUTPUT, "");
        assert_eq!(info.error_type.as_deref(), Some("ModuleNotFoundError"));
        assert_eq!(info.error_message.as_deref(), Some("No module named 'foo'"));
    }

    #[test]
    fn test_pytest_extracts_likely_file() {
        let info = PytestTraceParser.parse(PYTEST_OUTPUT, "");
        assert!(info.likely_files.contains(&"src/app.py".to_string()));
    }

    #[test]
    fn test_pytest_signature_stable_for_same_failure() {
        let a = PytestTraceParser.parse(PYTEST_OUTPUT, "");
        let b = PytestTraceParser.parse(PYTEST_OUTPUT, "");
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn test_pytest_no_failures_yields_empty_list() {
        let info = PytestTraceParser.parse("3 passed in 0.12s", "");
        assert!(info.failing_tests.is_empty());
    }

    const JEST_OUTPUT: &str = "\
FAIL src/app.test.js
  App component
    ✕ renders without crashing (12 ms)

  ● App component › renders without crashing

    TypeError: Cannot read properties of undefined (reading 'map')

      10 |   return (
      11 |     <div>
    > 12 |       {items.map(i => i)}
         |             ^

Tests:       1 failed, 1 total
";

    #[test]
    fn test_jest_extracts_failing_suite_file() {
        let info = JestTraceParser.parse(JEST_OUTPUT, "");
        assert_eq!(info.likely_files, vec!["src/app.test.js".to_string()]);
    }

    #[test]
    fn test_jest_extracts_failing_test_name() {
        let info = JestTraceParser.parse(JEST_OUTPUT, "");
        assert_eq!(info.failing_tests, vec!["renders without crashing".to_string()]);
    }

    #[test]
    fn test_jest_extracts_error_type() {
        let info = JestTraceParser.parse(JEST_OUTPUT, "");
        assert_eq!(info.error_type.as_deref(), Some("TypeError"));
    }

    #[test]
    fn test_jest_no_failures_yields_empty_list() {
        let info = JestTraceParser.parse("Tests: 3 passed, 3 total", "");
        assert!(info.failing_tests.is_empty());
    }
}
